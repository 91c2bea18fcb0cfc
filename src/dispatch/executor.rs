use super::{ContainerRuntime, DispatchOptions, Dispatcher, Termination};
use crate::config::Settings;
use crate::identity::{resolve_file_meta, resolve_job_meta, JobSource, Scope};
use crate::queue::{QueueEntry, RunFailure, RunResult};
use crate::runtime::{CancelToken, JobExecutor};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Turns a claimed queue entry into one container run.
pub struct StepExecutor<R: ContainerRuntime> {
    dispatcher: Dispatcher<R>,
    locker_root: PathBuf,
    host_locker_root: Option<PathBuf>,
    default_timeout: Duration,
    stop_grace: Duration,
    default_registry: String,
}

impl<R: ContainerRuntime> StepExecutor<R> {
    pub fn new(dispatcher: Dispatcher<R>, locker_root: PathBuf, settings: &Settings) -> Self {
        Self {
            dispatcher,
            locker_root,
            host_locker_root: settings.host_locker_path.clone(),
            default_timeout: Duration::from_secs(settings.container.default_timeout_secs),
            stop_grace: Duration::from_secs(settings.container.stop_grace_secs),
            default_registry: settings.container.default_registry.clone(),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<R> {
        &self.dispatcher
    }

    pub fn run_entry(&self, entry: &QueueEntry, cancel: &CancelToken) -> RunResult {
        let request = &entry.request;
        let job = match resolve_job_meta(JobSource::Trigger(request)) {
            Ok(job) => job,
            Err(err) => return RunResult::Failed(RunFailure::configuration(err.to_string())),
        };
        let file_meta =
            match resolve_file_meta(&job, job.scope == Scope::Shared, &self.locker_root) {
                Ok(meta) => meta,
                Err(err) => return RunResult::Failed(RunFailure::configuration(err.to_string())),
            };

        // Step variables layer over the request's pass-through variables.
        let mut env: BTreeMap<String, String> = request.env.clone();
        match request.step.env_pairs() {
            Ok(pairs) => env.extend(pairs),
            Err(err) => return RunResult::Failed(RunFailure::configuration(err.to_string())),
        }

        let options = DispatchOptions {
            timeout: request
                .step
                .timeout
                .map_or(self.default_timeout, |timeout| timeout.as_duration()),
            stop_grace: self.stop_grace,
            default_registry: self.default_registry.clone(),
            host_locker_root: self.host_locker_root.clone(),
            env,
            cancel: cancel.clone(),
        };

        match self
            .dispatcher
            .dispatch(&job, &file_meta, &request.step.image, &options)
        {
            Ok(outcome) => match outcome.termination {
                Termination::Cancelled => RunResult::Failed(RunFailure::cancelled()),
                Termination::TimedOut => RunResult::Failed(RunFailure::transient(format!(
                    "timed out after {}s",
                    options.timeout.as_secs()
                ))),
                Termination::Exited(code) if code != 0 => RunResult::Failed(
                    RunFailure::transient(format!("container exited with code {code}")),
                ),
                Termination::Exited(_) => match outcome.cache_error {
                    Some(err) => RunResult::Failed(RunFailure::transient(err)),
                    None => RunResult::Succeeded {
                        exports: outcome.exports,
                    },
                },
            },
            Err(err) if err.is_retryable() => {
                RunResult::Failed(RunFailure::transient(err.to_string()))
            }
            Err(err) => RunResult::Failed(RunFailure::configuration(err.to_string())),
        }
    }
}

impl<R> JobExecutor for StepExecutor<R>
where
    R: ContainerRuntime + 'static,
{
    fn execute(&self, entry: &QueueEntry, cancel: &CancelToken) -> RunResult {
        self.run_entry(entry, cancel)
    }
}
