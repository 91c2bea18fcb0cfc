use super::container::{ContainerRuntime, OutputStream, RunningContainer};
use super::image::normalize_image;
use super::run_spec::build_run_spec;
use super::DispatchError;
use crate::identity::{FileMeta, JobMeta};
use crate::locker::{ensure_locker_tree, CacheFiles, LogTags, StepLog};
use crate::protocol::{read_lines, Interpreter};
use crate::runtime::{CancelToken, RuntimeLog};
use crate::shared::time::now_secs;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const DRAIN_IDLE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub timeout: Duration,
    pub stop_grace: Duration,
    pub default_registry: String,
    /// Host-side locker root for bind mounts when the runtime sees a
    /// different filesystem than this process.
    pub host_locker_root: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub cancel: CancelToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub container_name: String,
    pub termination: Termination,
    /// Variables exported with `lemc.env;` lines.
    pub exports: BTreeMap<String, String>,
    pub commands_applied: usize,
    /// First failed cache write, if any. Later lines were still consumed.
    /// Also set when output could not be read to the end.
    pub cache_error: Option<String>,
    pub log_flush_error: Option<String>,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.termination == Termination::Exited(0) && self.cache_error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Cache files and step log for one run. Both are released when the guard is
/// dropped, whichever way the run ends.
struct RunResources {
    cache: CacheFiles,
    log: StepLog,
}

impl RunResources {
    fn release(&mut self) -> Option<String> {
        self.cache.close();
        self.log.close().err().map(|err| err.to_string())
    }
}

impl Drop for RunResources {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

/// Kills the container if the run is abandoned before it exits.
struct ContainerGuard {
    container: Box<dyn RunningContainer>,
    exited: bool,
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.exited {
            let _ = self.container.kill();
        }
    }
}

pub struct Dispatcher<R: ContainerRuntime> {
    runtime: R,
    log: RuntimeLog,
}

impl<R: ContainerRuntime> Dispatcher<R> {
    pub fn new(runtime: R, log: RuntimeLog) -> Self {
        Self { runtime, log }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Runs one step in a container. Stdout lines drive the cache files and
    /// are logged; stderr lines are only logged. The run ends when the
    /// container exits, the timeout elapses, or `options.cancel` fires.
    pub fn dispatch(
        &self,
        job: &JobMeta,
        file_meta: &FileMeta,
        image_ref: &str,
        options: &DispatchOptions,
    ) -> Result<RunOutcome, DispatchError> {
        let image = normalize_image(image_ref, &options.default_registry)?;
        let tree = ensure_locker_tree(file_meta, options.host_locker_root.as_deref())?;
        let mut resources = RunResources {
            cache: CacheFiles::open(&tree.internal.cache)?,
            log: StepLog::open(
                file_meta,
                &job.recipe_name,
                LogTags {
                    image_hash: image.short_hash(),
                    image_name: image.reference(),
                    step: job.step_id.clone(),
                },
                now_secs(),
            )?,
        };
        let spec = build_run_spec(job, image, &tree.bind, &options.env, options.timeout);

        if let Err(err) = self.runtime.remove_stale(&spec.name) {
            self.log.warn(
                "dispatch.remove_stale.failed",
                &format!("name={} error={err}", spec.name),
            );
        }
        let mut guard = ContainerGuard {
            container: self.runtime.start(&spec)?,
            exited: false,
        };
        self.log.info(
            "dispatch.started",
            &format!("name={} image={}", spec.name, spec.image),
        );

        let (tx, rx) = mpsc::channel::<(Stream, String)>();
        let mut readers = Vec::new();
        for (stream, source) in [
            (Stream::Stdout, guard.container.take_stdout()),
            (Stream::Stderr, guard.container.take_stderr()),
        ] {
            if let Some(source) = source {
                readers.push(spawn_reader(stream, source, tx.clone()));
            }
        }
        drop(tx);

        let (termination, summary, commands_applied, cache_error, exports) = {
            let mut consumer = LineConsumer {
                interpreter: Interpreter::new(&mut resources.cache),
                log: &mut resources.log,
                cache_error: None,
                log_failed: false,
            };
            let deadline = Instant::now() + options.timeout;
            let termination = loop {
                if let Some(code) = guard.container.try_wait()? {
                    break Termination::Exited(code);
                }
                let stop_reason = if options.cancel.is_cancelled() {
                    Some(Termination::Cancelled)
                } else if Instant::now() >= deadline {
                    Some(Termination::TimedOut)
                } else {
                    None
                };
                if let Some(reason) = stop_reason {
                    self.stop_container(&mut guard, &spec.name, options.stop_grace);
                    break reason;
                }
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok((stream, line)) => consumer.consume(stream, &line),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => thread::sleep(POLL_INTERVAL),
                }
            };
            guard.exited = true;

            if !drain_remaining(&rx, &mut consumer) {
                let message = format!(
                    "output truncated: no line for {}s and the streams stayed open",
                    DRAIN_IDLE.as_secs()
                );
                self.log.warn(
                    "dispatch.output.truncated",
                    &format!("name={} {message}", spec.name),
                );
                consumer.note(&message);
                consumer.cache_error.get_or_insert(message);
            }
            let summary = match termination {
                Termination::Exited(code) => format!("container exited with code {code}"),
                Termination::TimedOut => {
                    format!("container timed out after {}s", options.timeout.as_secs())
                }
                Termination::Cancelled => "container cancelled".to_string(),
            };
            consumer.note(&summary);
            let LineConsumer {
                interpreter,
                cache_error,
                ..
            } = consumer;
            let applied = interpreter.applied();
            (termination, summary, applied, cache_error, interpreter.into_exports())
        };
        for reader in readers {
            if reader.is_finished() {
                let _ = reader.join();
            }
        }

        let log_flush_error = resources.release();
        if let Some(err) = &log_flush_error {
            self.log.warn("dispatch.log.flush_failed", err);
        }
        self.log.info(
            "dispatch.finished",
            &format!("name={} {summary}", spec.name),
        );

        Ok(RunOutcome {
            container_name: spec.name,
            termination,
            exports,
            commands_applied,
            cache_error,
            log_flush_error,
        })
    }

    fn stop_container(&self, guard: &mut ContainerGuard, name: &str, grace: Duration) {
        if let Err(err) = guard.container.stop(grace) {
            self.log
                .warn("dispatch.stop.failed", &format!("name={name} error={err}"));
        }
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if matches!(guard.container.try_wait(), Ok(Some(_))) {
                return;
            }
            thread::sleep(POLL_INTERVAL);
        }
        self.log.warn("dispatch.force_kill", &format!("name={name}"));
        if let Err(err) = guard.container.kill() {
            self.log
                .error("dispatch.kill.failed", &format!("name={name} error={err}"));
        }
    }
}

fn spawn_reader(
    stream: Stream,
    source: OutputStream,
    tx: mpsc::Sender<(Stream, String)>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let _ = read_lines(source, |line| tx.send((stream, line)).is_ok());
    })
}

/// Consumes what is left after the container is gone, until both readers
/// reach end of file. Returns `false` if no line arrived for `DRAIN_IDLE`
/// while a stream was still open, as when a stray process holds the pipe.
fn drain_remaining(rx: &Receiver<(Stream, String)>, consumer: &mut LineConsumer<'_>) -> bool {
    loop {
        match rx.recv_timeout(DRAIN_IDLE) {
            Ok((stream, line)) => consumer.consume(stream, &line),
            Err(RecvTimeoutError::Disconnected) => return true,
            Err(RecvTimeoutError::Timeout) => return false,
        }
    }
}

struct LineConsumer<'a> {
    interpreter: Interpreter<'a>,
    log: &'a mut StepLog,
    cache_error: Option<String>,
    log_failed: bool,
}

impl LineConsumer<'_> {
    fn consume(&mut self, stream: Stream, line: &str) {
        match stream {
            Stream::Stdout => {
                if let Err(err) = self.interpreter.apply(line) {
                    self.cache_error.get_or_insert_with(|| err.to_string());
                }
                self.note(line);
            }
            Stream::Stderr => self.note(&format!("[stderr] {line}")),
        }
    }

    fn note(&mut self, message: &str) {
        if self.log_failed {
            return;
        }
        if self.log.write(message, now_secs()).is_err() {
            self.log_failed = true;
        }
    }
}
