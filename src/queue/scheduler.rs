use super::recovery::reset_interrupted;
use super::retry::{next_occurrence, FailureDisposition, RetryPolicy};
use super::store::{ControlRequest, Inbound, QueueStore};
use super::{
    EntryStatus, JobRequest, JobStatus, KeyGate, QueueClass, QueueEntry, QueueError, RunResult,
    Schedule, StatusBoard,
};
use crate::identity::{resolve_job_meta, JobSource};
use crate::recipe::{plan_recipe, RecipeTrigger};
use crate::runtime::RuntimeLog;
use crate::shared::ids::generate_id;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Succeeded,
    Retrying { retry_at: i64 },
    Rescheduled { scheduled_at: i64 },
    Failed,
    /// The run was replaced by a resubmission while in flight; its result is
    /// discarded.
    Superseded,
}

/// Why an in-flight entry must not be rescheduled when its run completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retired {
    Resubmitted,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CancelOutcome {
    pub removed_pending: usize,
    pub in_flight: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub submitted: usize,
    pub rejected: usize,
    /// Keys whose in-flight run must be signalled to stop.
    pub cancel_in_flight: Vec<String>,
}

/// Owns every live queue entry. Callers drive it with explicit `now` values:
/// `next_runnable` hands out work, `complete` records the result.
pub struct Scheduler {
    store: QueueStore,
    policy: RetryPolicy,
    board: StatusBoard,
    log: RuntimeLog,
    entries: BTreeMap<String, QueueEntry>,
    gate: KeyGate,
    retired: HashMap<String, Retired>,
    next_seq: u64,
}

impl Scheduler {
    pub fn open(
        store: QueueStore,
        policy: RetryPolicy,
        log: RuntimeLog,
        now: i64,
    ) -> Result<Self, QueueError> {
        store.ensure_dirs()?;
        let mut loaded = store.load_all()?;
        for path in &loaded.quarantined {
            log.warn(
                "queue.quarantined",
                &format!("moved unreadable entry to {}", path.display()),
            );
        }

        let board = StatusBoard::default();
        match store.read_status() {
            Ok(previous) => board.restore(previous),
            Err(err) => log.warn("queue.status.unreadable", &err.to_string()),
        }

        for id in reset_interrupted(&mut loaded.entries, now) {
            log.info("queue.recovered", &format!("reset running entry {id} to pending"));
            if let Some(entry) = loaded.entries.iter().find(|entry| entry.id == id) {
                store.save(entry)?;
            }
        }

        let next_seq = loaded
            .entries
            .iter()
            .map(|entry| entry.seq)
            .max()
            .map_or(1, |seq| seq + 1);
        let mut scheduler = Self {
            store,
            policy,
            board,
            log,
            entries: BTreeMap::new(),
            gate: KeyGate::default(),
            retired: HashMap::new(),
            next_seq,
        };
        for entry in loaded.entries {
            scheduler.board.publish(&entry);
            scheduler.entries.insert(entry.id.clone(), entry);
        }
        scheduler.flush_status();
        Ok(scheduler)
    }

    pub fn board(&self) -> StatusBoard {
        self.board.clone()
    }

    pub fn status_of(&self, key: &str) -> Option<JobStatus> {
        self.board.status_of(key)
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    pub fn entries(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.values()
    }

    pub fn pending_len(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.status == EntryStatus::Pending)
            .count()
    }

    pub fn running_len(&self) -> usize {
        self.gate.active_len()
    }

    pub fn has_eligible(&self, now: i64) -> bool {
        self.entries.values().any(|entry| entry.is_eligible(now))
    }

    pub fn enqueue(
        &mut self,
        request: JobRequest,
        schedule: Schedule,
        now: i64,
    ) -> Result<QueueEntry, QueueError> {
        let key = resolve_job_meta(JobSource::Trigger(&request))?.container_name();
        let entry = QueueEntry {
            id: generate_id("job", now).map_err(QueueError::Id)?,
            key,
            request,
            schedule,
            attempt: 0,
            status: EntryStatus::Pending,
            last_error: None,
            retry_at: None,
            seq: self.next_seq,
            created_at: now,
            updated_at: now,
        };
        self.store.save(&entry)?;
        self.next_seq += 1;
        self.log.info(
            "queue.enqueued",
            &format!(
                "id={} class={} key={}",
                entry.id,
                entry.schedule.class(),
                entry.key
            ),
        );
        self.publish(&entry);
        self.entries.insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    /// Replaces any work for the recipe's keys with a fresh plan. A run in
    /// flight for one of those keys finishes, but is not rescheduled.
    pub fn submit_recipe(
        &mut self,
        trigger: &RecipeTrigger,
        now: i64,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let planned = plan_recipe(trigger, now)?;
        for (request, _) in &planned {
            let key = resolve_job_meta(JobSource::Trigger(request))?.container_name();
            self.cancel_pending(&key, now)?;
            self.retire_running(&key, Retired::Resubmitted);
        }
        planned
            .into_iter()
            .map(|(request, schedule)| self.enqueue(request, schedule, now))
            .collect()
    }

    /// Removes pending entries for `key` and reports whether a run for it is
    /// in flight. Stopping that run is the caller's job; its completion then
    /// arrives through [`Scheduler::complete`] and is recorded as cancelled.
    pub fn cancel(&mut self, key: &str, now: i64) -> Result<CancelOutcome, QueueError> {
        let removed_pending = self.cancel_pending(key, now)?;
        self.retire_running(key, Retired::Cancelled);
        Ok(CancelOutcome {
            removed_pending,
            in_flight: self.gate.is_active(key),
        })
    }

    fn retire_running(&mut self, key: &str, reason: Retired) {
        for entry in self.entries.values() {
            if entry.key == key && entry.status == EntryStatus::Running {
                let current = self.retired.entry(entry.id.clone()).or_insert(reason);
                if reason == Retired::Cancelled {
                    *current = Retired::Cancelled;
                }
            }
        }
    }

    fn cancel_pending(&mut self, key: &str, now: i64) -> Result<usize, QueueError> {
        let ids: Vec<String> = self
            .entries
            .values()
            .filter(|entry| entry.key == key && entry.status == EntryStatus::Pending)
            .map(|entry| entry.id.clone())
            .collect();
        for id in &ids {
            if let Some(mut entry) = self.entries.remove(id) {
                entry.status = EntryStatus::Failed;
                entry.last_error = Some("cancelled".to_string());
                entry.retry_at = None;
                entry.updated_at = now;
                self.store.move_to_failed(&entry)?;
                self.log
                    .info("queue.cancelled", &format!("id={} key={}", entry.id, key));
                self.publish(&entry);
            }
        }
        Ok(ids.len())
    }

    /// Marks up to `max_items` eligible entries running and returns them.
    /// `now` entries go first, then due `in`/`every` entries, each FIFO by
    /// enqueue order. A key with a run in flight is skipped, not dropped.
    pub fn next_runnable(
        &mut self,
        now: i64,
        max_items: usize,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        if max_items == 0 {
            return Ok(Vec::new());
        }
        let mut candidates: Vec<(bool, u64, String, String)> = self
            .entries
            .values()
            .filter(|entry| entry.is_eligible(now))
            .map(|entry| {
                (
                    entry.schedule.class() != QueueClass::Now,
                    entry.seq,
                    entry.id.clone(),
                    entry.key.clone(),
                )
            })
            .collect();
        candidates.sort();

        let (selected, _) = self
            .gate
            .admit(candidates, max_items, |candidate| candidate.3.as_str());

        // A failed write releases the key of that entry and of every entry
        // after it; entries already claimed are still handed out.
        let mut started = Vec::with_capacity(selected.len());
        let mut selected = selected.into_iter();
        while let Some((_, _, id, key)) = selected.next() {
            let Some(entry) = self.entries.get_mut(&id) else {
                self.gate.complete(&key);
                continue;
            };
            let previous = entry.clone();
            entry.status = EntryStatus::Running;
            entry.retry_at = None;
            entry.updated_at = now;
            let snapshot = entry.clone();
            if let Err(err) = self.store.save(&snapshot) {
                *entry = previous;
                self.gate.complete(&key);
                for (_, _, _, unclaimed) in selected.by_ref() {
                    self.gate.complete(&unclaimed);
                }
                self.log
                    .error("queue.claim_failed", &format!("id={id} key={key} error={err}"));
                if started.is_empty() {
                    return Err(err);
                }
                break;
            }
            self.publish(&snapshot);
            started.push(snapshot);
        }
        Ok(started)
    }

    /// Records the result of a run. The entry's new state is persisted before
    /// it leaves memory; if that write fails the entry stays known here with
    /// its new state and the error is returned.
    pub fn complete(
        &mut self,
        id: &str,
        result: RunResult,
        now: i64,
    ) -> Result<Completion, QueueError> {
        let mut entry = self
            .entries
            .get(id)
            .cloned()
            .ok_or_else(|| QueueError::UnknownEntry(id.to_string()))?;
        self.gate.complete(&entry.key);
        entry.updated_at = now;

        if let Some(reason) = self.retired.remove(id) {
            return self.finish_retired(entry, reason);
        }

        let mut continuation = None;
        let completion = match result {
            RunResult::Succeeded { exports } => {
                let (completion, next) = on_success(&mut entry, exports, now);
                continuation = next;
                completion
            }
            RunResult::Failed(failure) => {
                let attempt = entry.attempt.saturating_add(1);
                entry.attempt = attempt;
                entry.last_error = Some(failure.message.clone());
                match self.policy.on_failure(&entry, attempt, failure.kind, now) {
                    FailureDisposition::RetryAt(retry_at) => {
                        entry.status = EntryStatus::Pending;
                        entry.retry_at = Some(retry_at);
                        Completion::Retrying { retry_at }
                    }
                    FailureDisposition::Reschedule { scheduled_at } => {
                        reschedule(&mut entry, scheduled_at);
                        entry.attempt = 0;
                        Completion::Rescheduled { scheduled_at }
                    }
                    FailureDisposition::Terminal => {
                        entry.status = EntryStatus::Failed;
                        entry.retry_at = None;
                        Completion::Failed
                    }
                }
            }
        };

        self.log.info(
            "queue.completed",
            &format!(
                "id={} key={} outcome={:?} attempt={}",
                entry.id, entry.key, completion, entry.attempt
            ),
        );
        self.settle(entry)?;
        if let Some(request) = continuation {
            self.enqueue(request, Schedule::Now, now)?;
        }
        Ok(completion)
    }

    fn finish_retired(
        &mut self,
        mut entry: QueueEntry,
        reason: Retired,
    ) -> Result<Completion, QueueError> {
        entry.retry_at = None;
        entry.status = EntryStatus::Failed;
        match reason {
            Retired::Resubmitted => {
                entry.last_error = Some("superseded by a newer submission".to_string());
                if let Err(err) = self.store.remove(&entry.id) {
                    self.entries.insert(entry.id.clone(), entry);
                    return Err(err);
                }
                self.log.info(
                    "queue.superseded",
                    &format!("id={} key={}", entry.id, entry.key),
                );
                self.entries.remove(&entry.id);
                Ok(Completion::Superseded)
            }
            Retired::Cancelled => {
                entry.last_error = Some("cancelled".to_string());
                self.log
                    .info("queue.cancelled", &format!("id={} key={}", entry.id, entry.key));
                self.settle(entry)?;
                Ok(Completion::Failed)
            }
        }
    }

    /// Persists a completed entry, then updates memory to match.
    fn settle(&mut self, entry: QueueEntry) -> Result<(), QueueError> {
        let persisted = match entry.status {
            EntryStatus::Pending => self.store.save(&entry),
            EntryStatus::Failed => self.store.move_to_failed(&entry).map(|_| ()),
            EntryStatus::Succeeded | EntryStatus::Running => self.store.remove(&entry.id),
        };
        self.publish(&entry);
        if let Err(err) = persisted {
            self.log.error(
                "queue.persist_failed",
                &format!("id={} status={} error={err}", entry.id, entry.status),
            );
            self.entries.insert(entry.id.clone(), entry);
            return Err(err);
        }
        if entry.status == EntryStatus::Pending {
            self.entries.insert(entry.id.clone(), entry);
        } else {
            self.entries.remove(&entry.id);
        }
        Ok(())
    }

    /// Applies pending submissions and cancellations dropped by other
    /// processes.
    pub fn ingest(&mut self, now: i64) -> Result<IngestReport, QueueError> {
        let mut report = IngestReport::default();
        for inbound in self.store.take_incoming()? {
            match inbound {
                Inbound::Accepted(trigger) => match self.submit_recipe(&trigger, now) {
                    Ok(entries) => report.submitted += entries.len(),
                    Err(err @ (QueueError::Recipe(_) | QueueError::Identity(_))) => {
                        report.rejected += 1;
                        self.log.warn("queue.submit.rejected", &err.to_string());
                    }
                    Err(err) => return Err(err),
                },
                Inbound::Rejected { path, reason } => {
                    report.rejected += 1;
                    self.log.warn(
                        "queue.submit.rejected",
                        &format!("{}: {reason}", path.display()),
                    );
                }
            }
        }
        for inbound in self.store.take_control()? {
            match inbound {
                Inbound::Accepted(ControlRequest::Cancel { key }) => {
                    let outcome = self.cancel(&key, now)?;
                    if outcome.in_flight {
                        report.cancel_in_flight.push(key);
                    }
                }
                Inbound::Rejected { path, reason } => {
                    report.rejected += 1;
                    self.log.warn(
                        "queue.control.rejected",
                        &format!("{}: {reason}", path.display()),
                    );
                }
            }
        }
        Ok(report)
    }

    fn publish(&self, entry: &QueueEntry) {
        self.board.publish(entry);
        self.flush_status();
    }

    fn flush_status(&self) {
        if let Err(err) = self.store.write_status(&self.board.snapshot()) {
            self.log.warn("queue.status.write_failed", &err.to_string());
        }
    }
}

/// Success reschedules a recurring entry; otherwise the entry is done and the
/// next `now` step, if any, is returned with this run's exports layered in.
fn on_success(
    entry: &mut QueueEntry,
    exports: BTreeMap<String, String>,
    now: i64,
) -> (Completion, Option<JobRequest>) {
    entry.last_error = None;
    entry.retry_at = None;
    entry.attempt = 0;
    if let Schedule::Every {
        interval_secs,
        scheduled_at,
    } = entry.schedule
    {
        let next = next_occurrence(scheduled_at, interval_secs, now);
        reschedule(entry, next);
        return (Completion::Rescheduled { scheduled_at: next }, None);
    }

    entry.status = EntryStatus::Succeeded;
    let continuation = entry
        .request
        .continuation
        .split_first()
        .map(|(next_step, rest)| {
            let mut env = entry.request.env.clone();
            env.extend(exports);
            JobRequest {
                step: next_step.clone(),
                continuation: rest.to_vec(),
                env,
                ..entry.request.clone()
            }
        });
    (Completion::Succeeded, continuation)
}

fn reschedule(entry: &mut QueueEntry, scheduled_at: i64) {
    if let Schedule::Every { interval_secs, .. } = entry.schedule {
        entry.schedule = Schedule::Every {
            interval_secs,
            scheduled_at,
        };
    }
    entry.status = EntryStatus::Pending;
    entry.retry_at = None;
}
