/// Failures of the long-running server: its state tree, serve lock and
/// worker pool.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("cannot create state directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("locker root {path} is not writable: {source}")]
    LockerNotWritable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot read serve state {path}: {source}")]
    ReadState {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serve state {path} is not valid json: {source}")]
    ParseState {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot persist serve state {path}: {source}")]
    WriteState {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write serve lock {path}: {source}")]
    WriteLock {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot read serve lock {path}: {source}")]
    ReadLock {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("lemc is already running (pid={pid})")]
    AlreadyRunning { pid: u32 },
    #[error("lemc is not running")]
    NotRunning,
    #[error("process {pid} remained alive after stop request")]
    StopFailedAlive { pid: u32 },
    #[error("worker pool completion channel disconnected")]
    CompletionChannelClosed,
    #[error(transparent)]
    Queue(#[from] crate::queue::QueueError),
}
