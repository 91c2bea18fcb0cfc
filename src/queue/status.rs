use super::{EntryStatus, QueueClass, QueueEntry};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub status: EntryStatus,
    pub attempt: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub class: QueueClass,
    #[serde(default)]
    pub next_run_at: Option<i64>,
    pub updated_at: i64,
}

impl JobStatus {
    pub fn of(entry: &QueueEntry) -> Self {
        Self {
            status: entry.status,
            attempt: entry.attempt,
            last_error: entry.last_error.clone(),
            class: entry.schedule.class(),
            next_run_at: entry.next_run_at(),
            updated_at: entry.updated_at,
        }
    }
}

/// Latest status per job key. Cloned handles share one map; readers never wait
/// on a run, only on the brief map update.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<BTreeMap<String, JobStatus>>>,
}

impl StatusBoard {
    pub fn publish(&self, entry: &QueueEntry) {
        self.inner
            .write()
            .insert(entry.key.clone(), JobStatus::of(entry));
    }

    pub fn status_of(&self, key: &str) -> Option<JobStatus> {
        self.inner.read().get(key).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, JobStatus> {
        self.inner.read().clone()
    }

    pub fn restore(&self, statuses: BTreeMap<String, JobStatus>) {
        *self.inner.write() = statuses;
    }
}
