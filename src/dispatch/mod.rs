pub mod container;
pub mod dispatcher;
pub mod docker;
pub mod executor;
pub mod image;
pub mod run_spec;

pub use container::{ContainerRuntime, OutputStream, RunningContainer};
pub use dispatcher::{DispatchOptions, Dispatcher, RunOutcome, Termination};
pub use docker::DockerCli;
pub use executor::StepExecutor;
pub use image::{normalize_image, ImageRef, DEFAULT_TAG};
pub use run_spec::{build_env, build_mounts, build_run_spec, element_ids, Mount, RunSpec};

use crate::identity::IdentityError;
use crate::locker::LockerError;

#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("container runtime binary not found: {binary}")]
    MissingBinary { binary: String },
    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` failed with exit code {code}: {stderr}")]
    Command {
        command: String,
        code: i32,
        stderr: String,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid image reference `{reference}`: {reason}")]
    InvalidImage { reference: String, reason: String },
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Locker(#[from] LockerError),
    #[error(transparent)]
    Container(#[from] ContainerError),
}

impl DispatchError {
    /// Infrastructure trouble is worth retrying; a malformed job is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidImage { .. } | Self::Identity(_) => false,
            Self::Container(ContainerError::MissingBinary { .. }) => false,
            Self::Locker(_) | Self::Container(_) => true,
        }
    }
}
