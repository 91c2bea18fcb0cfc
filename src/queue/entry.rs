use crate::identity::Scope;
use crate::recipe::StepSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueClass {
    Now,
    In,
    Every,
}

impl QueueClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Now => "now",
            Self::In => "in",
            Self::Every => "every",
        }
    }
}

impl fmt::Display for QueueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum Schedule {
    Now,
    In {
        scheduled_at: i64,
    },
    Every {
        interval_secs: u64,
        scheduled_at: i64,
    },
}

impl Schedule {
    pub fn class(&self) -> QueueClass {
        match self {
            Self::Now => QueueClass::Now,
            Self::In { .. } => QueueClass::In,
            Self::Every { .. } => QueueClass::Every,
        }
    }

    pub fn scheduled_at(&self) -> Option<i64> {
        match self {
            Self::Now => None,
            Self::In { scheduled_at } | Self::Every { scheduled_at, .. } => Some(*scheduled_at),
        }
    }

    pub fn is_due(&self, now: i64) -> bool {
        self.scheduled_at().map_or(true, |at| at <= now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a queue entry runs: one step of a recipe for one user on one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub uuid: String,
    pub page_id: String,
    pub user_id: String,
    pub username: String,
    pub recipe_name: String,
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookbook_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    pub step: StepSpec,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Remaining `now` steps, run one after another once this one succeeds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub continuation: Vec<StepSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    pub key: String,
    pub request: JobRequest,
    pub schedule: Schedule,
    pub attempt: u32,
    pub status: EntryStatus,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub retry_at: Option<i64>,
    pub seq: u64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl QueueEntry {
    pub fn is_eligible(&self, now: i64) -> bool {
        self.status == EntryStatus::Pending
            && self.retry_at.map_or(true, |at| at <= now)
            && self.schedule.is_due(now)
    }

    /// Earliest time the entry could become eligible.
    pub fn next_run_at(&self) -> Option<i64> {
        match (self.schedule.scheduled_at(), self.retry_at) {
            (Some(at), Some(retry)) => Some(at.max(retry)),
            (at, retry) => at.or(retry),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Infrastructure trouble or a non-zero exit; retried.
    Transient,
    /// The job itself is malformed; never retried.
    Configuration,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl RunFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Configuration,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: FailureKind::Cancelled,
            message: "cancelled".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResult {
    Succeeded { exports: BTreeMap<String, String> },
    Failed(RunFailure),
}

impl RunResult {
    pub fn success() -> Self {
        Self::Succeeded {
            exports: BTreeMap::new(),
        }
    }
}
