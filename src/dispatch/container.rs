use super::{ContainerError, RunSpec};
use std::io::Read;
use std::time::Duration;

pub type OutputStream = Box<dyn Read + Send>;

/// The only capability the dispatcher needs from a container engine: start a
/// named container from a [`RunSpec`] and stream its output.
pub trait ContainerRuntime: Send + Sync {
    /// Removes a leftover container with this name. Absence is not an error.
    fn remove_stale(&self, name: &str) -> Result<(), ContainerError>;

    fn start(&self, spec: &RunSpec) -> Result<Box<dyn RunningContainer>, ContainerError>;
}

pub trait RunningContainer: Send {
    fn take_stdout(&mut self) -> Option<OutputStream>;
    fn take_stderr(&mut self) -> Option<OutputStream>;
    /// Exit code once the container has exited.
    fn try_wait(&mut self) -> Result<Option<i32>, ContainerError>;
    /// Asks the container to stop, allowing `grace` before the engine kills it.
    fn stop(&mut self, grace: Duration) -> Result<(), ContainerError>;
    fn kill(&mut self) -> Result<(), ContainerError>;
}
