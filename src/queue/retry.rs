use super::{FailureKind, QueueEntry, Schedule};
use crate::config::SchedulerSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
    pub recurring_retry_cap: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&SchedulerSettings::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Stay pending; eligible again at the given time.
    RetryAt(i64),
    /// Recurring entry gave up on this occurrence; next run at `scheduled_at`.
    Reschedule { scheduled_at: i64 },
    Terminal,
}

impl RetryPolicy {
    pub fn from_settings(settings: &SchedulerSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            backoff_base_secs: settings.backoff_base_secs,
            backoff_max_secs: settings.backoff_max_secs,
            recurring_retry_cap: settings.recurring_retry_cap,
        }
    }

    /// `base * 2^(attempt-1)`, capped at `backoff_max_secs`.
    pub fn backoff_secs(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(32);
        self.backoff_base_secs
            .saturating_mul(1_u64 << exponent)
            .min(self.backoff_max_secs)
    }

    /// Decides what happens after a failed run. `attempt` is the count of
    /// failures including this one.
    pub fn on_failure(
        &self,
        entry: &QueueEntry,
        attempt: u32,
        kind: FailureKind,
        now: i64,
    ) -> FailureDisposition {
        if kind != FailureKind::Transient {
            return FailureDisposition::Terminal;
        }
        let retry_at = now.saturating_add(to_i64(self.backoff_secs(attempt)));
        match entry.schedule {
            Schedule::Now | Schedule::In { .. } => {
                if attempt < self.max_attempts {
                    FailureDisposition::RetryAt(retry_at)
                } else {
                    FailureDisposition::Terminal
                }
            }
            Schedule::Every {
                interval_secs,
                scheduled_at,
            } => {
                if attempt <= self.recurring_retry_cap {
                    FailureDisposition::RetryAt(retry_at)
                } else {
                    FailureDisposition::Reschedule {
                        scheduled_at: next_occurrence(scheduled_at, interval_secs, now),
                    }
                }
            }
        }
    }
}

/// `now + interval`, never earlier than `previous`.
pub fn next_occurrence(previous: i64, interval_secs: u64, now: i64) -> i64 {
    now.saturating_add(to_i64(interval_secs)).max(previous)
}

fn to_i64(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Scope;
    use crate::queue::{EntryStatus, JobRequest};
    use crate::recipe::{DoSpec, StepSpec};
    use std::collections::BTreeMap;

    fn entry(schedule: Schedule) -> QueueEntry {
        QueueEntry {
            id: "job-1".to_string(),
            key: "key".to_string(),
            request: JobRequest {
                uuid: "abc".to_string(),
                page_id: "1".to_string(),
                user_id: "1".to_string(),
                username: "alice".to_string(),
                recipe_name: "r".to_string(),
                scope: Scope::Individual,
                cookbook_id: None,
                app_id: None,
                step: StepSpec {
                    step: 1,
                    name: None,
                    image: "alpine".to_string(),
                    do_spec: DoSpec::Now,
                    timeout: None,
                    environment: Vec::new(),
                },
                env: BTreeMap::new(),
                continuation: Vec::new(),
            },
            schedule,
            attempt: 0,
            status: EntryStatus::Running,
            last_error: None,
            retry_at: None,
            seq: 1,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_base_secs: 5,
            backoff_max_secs: 12,
            recurring_retry_cap: 2,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = policy();
        assert_eq!(policy.backoff_secs(1), 5);
        assert_eq!(policy.backoff_secs(2), 10);
        assert_eq!(policy.backoff_secs(3), 12);
        assert_eq!(policy.backoff_secs(200), 12);
    }

    #[test]
    fn one_shot_entries_stop_after_max_attempts() {
        let policy = policy();
        let entry = entry(Schedule::Now);
        assert_eq!(
            policy.on_failure(&entry, 1, FailureKind::Transient, 100),
            FailureDisposition::RetryAt(105)
        );
        assert_eq!(
            policy.on_failure(&entry, 3, FailureKind::Transient, 100),
            FailureDisposition::Terminal
        );
        assert_eq!(
            policy.on_failure(&entry, 1, FailureKind::Configuration, 100),
            FailureDisposition::Terminal
        );
    }

    #[test]
    fn recurring_entries_reschedule_after_cap() {
        let policy = policy();
        let entry = entry(Schedule::Every {
            interval_secs: 60,
            scheduled_at: 100,
        });
        assert_eq!(
            policy.on_failure(&entry, 2, FailureKind::Transient, 120),
            FailureDisposition::RetryAt(130)
        );
        assert_eq!(
            policy.on_failure(&entry, 3, FailureKind::Transient, 140),
            FailureDisposition::Reschedule { scheduled_at: 200 }
        );
        assert_eq!(
            policy.on_failure(&entry, 1, FailureKind::Cancelled, 140),
            FailureDisposition::Terminal
        );
    }

    #[test]
    fn next_occurrence_never_moves_backwards() {
        assert_eq!(next_occurrence(500, 60, 100), 500);
        assert_eq!(next_occurrence(100, 60, 100), 160);
    }
}
