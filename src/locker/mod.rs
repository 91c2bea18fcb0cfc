pub mod cache_files;
pub mod step_log;
pub mod tree;
pub use cache_files::{CacheChannel, CacheFiles};
pub use step_log::{step_log_path, LogTags, StepLog};
pub use tree::{ensure_locker_tree, locker_tree, LockerDirs, LockerTree, LOCKER_DIR_MODE};

#[derive(Debug, thiserror::Error)]
pub enum LockerError {
    #[error("failed to create locker directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to open locker file {path}: {source}")]
    OpenFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write locker file {path}: {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to flush step log {path}: {source}")]
    Flush {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cache file for `{channel}` is already closed")]
    CacheClosed { channel: CacheChannel },
    #[error("step log {path} is already closed")]
    LogClosed { path: String },
}
