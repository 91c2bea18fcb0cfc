use super::worker_primitives::{sleep_with_stop, CancelToken};
use super::{RuntimeError, RuntimeLog};
use crate::queue::{Completion, FailureKind, QueueEntry, RunFailure, RunResult, Scheduler};
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Runs one claimed queue entry to completion on a worker thread.
pub trait JobExecutor: Send + Sync + 'static {
    fn execute(&self, entry: &QueueEntry, cancel: &CancelToken) -> RunResult;
}

#[derive(Debug)]
struct Finished {
    id: String,
    key: String,
    result: RunResult,
}

/// Bounded set of worker threads fed by a [`Scheduler`]. The pool thread is
/// the only one touching the scheduler; workers report back over a channel.
pub struct WorkerPool<E: JobExecutor> {
    executor: Arc<E>,
    worker_limit: usize,
    poll_interval: Duration,
    log: RuntimeLog,
    in_flight: HashMap<String, CancelToken>,
    user_cancelled: HashSet<String>,
    tx: Sender<Finished>,
    rx: Receiver<Finished>,
}

impl<E: JobExecutor> WorkerPool<E> {
    pub fn new(executor: E, worker_limit: usize, poll_interval: Duration, log: RuntimeLog) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            executor: Arc::new(executor),
            worker_limit: worker_limit.max(1),
            poll_interval,
            log,
            in_flight: HashMap::new(),
            user_cancelled: HashSet::new(),
            tx,
            rx,
        }
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Signals the run for `key`, if any. Its completion is still recorded.
    pub fn cancel_key(&mut self, key: &str) -> bool {
        let Some(token) = self.in_flight.get(key) else {
            return false;
        };
        token.cancel();
        self.user_cancelled.insert(key.to_string());
        true
    }

    fn dispatch(&mut self, scheduler: &mut Scheduler, now: i64) -> Result<usize, RuntimeError> {
        let available = self.worker_limit.saturating_sub(self.in_flight.len());
        if available == 0 {
            return Ok(0);
        }
        let entries = scheduler.next_runnable(now, available)?;
        let started = entries.len();
        for entry in entries {
            let token = CancelToken::default();
            self.in_flight.insert(entry.key.clone(), token.clone());
            let executor = Arc::clone(&self.executor);
            let tx = self.tx.clone();
            self.log.info(
                "worker.started",
                &format!("id={} key={} attempt={}", entry.id, entry.key, entry.attempt),
            );
            thread::spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| executor.execute(&entry, &token)))
                    .unwrap_or_else(|_| {
                        RunResult::Failed(RunFailure::transient("executor panicked"))
                    });
                let _ = tx.send(Finished {
                    id: entry.id,
                    key: entry.key,
                    result,
                });
            });
        }
        Ok(started)
    }

    /// Records a finished run. During shutdown, runs stopped by the shutdown
    /// itself are left `running` on disk so the next start resets them.
    fn settle(
        &mut self,
        scheduler: &mut Scheduler,
        finished: Finished,
        now: i64,
        stopping: bool,
    ) -> Result<Option<Completion>, RuntimeError> {
        self.in_flight.remove(&finished.key);
        let user_cancelled = self.user_cancelled.remove(&finished.key);
        let interrupted = matches!(
            &finished.result,
            RunResult::Failed(failure) if failure.kind == FailureKind::Cancelled
        );
        if stopping && interrupted && !user_cancelled {
            self.log.info(
                "worker.interrupted",
                &format!("id={} key={}", finished.id, finished.key),
            );
            return Ok(None);
        }
        if let RunResult::Failed(failure) = &finished.result {
            self.log.warn(
                "worker.failed",
                &format!("id={} key={} error={}", finished.id, finished.key, failure.message),
            );
        }
        let completion = scheduler.complete(&finished.id, finished.result, now)?;
        Ok(Some(completion))
    }

    /// Runs everything eligible at the clock's current time, then returns the
    /// number of completed runs.
    pub fn drain<F>(&mut self, scheduler: &mut Scheduler, clock: F) -> Result<usize, RuntimeError>
    where
        F: Fn() -> i64,
    {
        let mut processed = 0usize;
        loop {
            self.dispatch(scheduler, clock())?;
            if self.in_flight.is_empty() {
                break;
            }
            let finished = self
                .rx
                .recv()
                .map_err(|_| RuntimeError::CompletionChannelClosed)?;
            self.settle(scheduler, finished, clock(), false)?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Serves until `stop` is raised. On stop, in-flight runs are cancelled
    /// and awaited before returning.
    pub fn run<F>(
        &mut self,
        scheduler: &mut Scheduler,
        stop: &AtomicBool,
        clock: F,
    ) -> Result<(), RuntimeError>
    where
        F: Fn() -> i64,
    {
        let mut shutdown_started = false;
        loop {
            if stop.load(Ordering::Relaxed) {
                if !shutdown_started {
                    shutdown_started = true;
                    self.log.info(
                        "worker.shutdown",
                        &format!("cancelling {} in-flight runs", self.in_flight.len()),
                    );
                    for token in self.in_flight.values() {
                        token.cancel();
                    }
                }
                if self.in_flight.is_empty() {
                    return Ok(());
                }
                match self.rx.recv_timeout(self.poll_interval) {
                    Ok(finished) => self.settle_logged(scheduler, finished, clock(), true),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(RuntimeError::CompletionChannelClosed)
                    }
                }
                continue;
            }

            let now = clock();
            match scheduler.ingest(now) {
                Ok(report) => {
                    for key in report.cancel_in_flight {
                        self.cancel_key(&key);
                    }
                }
                Err(err) => self.log.error("queue.ingest.failed", &err.to_string()),
            }
            if let Err(err) = self.dispatch(scheduler, now) {
                self.log.error("worker.dispatch.failed", &err.to_string());
            }
            while let Ok(finished) = self.rx.try_recv() {
                self.settle_logged(scheduler, finished, clock(), false);
            }

            if self.in_flight.is_empty() {
                if !scheduler.has_eligible(clock()) {
                    sleep_with_stop(stop, self.poll_interval);
                }
                continue;
            }
            match self.rx.recv_timeout(self.poll_interval) {
                Ok(finished) => self.settle_logged(scheduler, finished, clock(), false),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(RuntimeError::CompletionChannelClosed)
                }
            }
        }
    }

    fn settle_logged(
        &mut self,
        scheduler: &mut Scheduler,
        finished: Finished,
        now: i64,
        stopping: bool,
    ) {
        if let Err(err) = self.settle(scheduler, finished, now, stopping) {
            self.log.error("worker.complete.failed", &err.to_string());
        }
    }
}
