pub mod entry;
pub mod key_gate;
pub mod recovery;
pub mod retry;
pub mod scheduler;
pub mod status;
pub mod store;

pub use entry::{
    EntryStatus, FailureKind, JobRequest, QueueClass, QueueEntry, RunFailure, RunResult, Schedule,
};
pub use key_gate::KeyGate;
pub use recovery::reset_interrupted;
pub use retry::{next_occurrence, FailureDisposition, RetryPolicy};
pub use scheduler::{CancelOutcome, Completion, IngestReport, Scheduler};
pub use status::{JobStatus, StatusBoard};
pub use store::{ControlRequest, Inbound, LoadedQueue, QueuePaths, QueueStore};

use crate::identity::IdentityError;
use crate::recipe::RecipeError;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid queue payload in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to generate queue id: {0}")]
    Id(String),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Recipe(#[from] RecipeError),
    #[error("unknown queue entry `{0}`")]
    UnknownEntry(String),
}
