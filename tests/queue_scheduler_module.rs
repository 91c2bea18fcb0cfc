use lemc::identity::Scope;
use lemc::queue::{
    Completion, EntryStatus, JobRequest, QueuePaths, QueueStore, RetryPolicy, RunFailure,
    RunResult, Schedule, Scheduler,
};
use lemc::recipe::{DoSpec, Recipe, RecipeTrigger, StepSpec};
use lemc::runtime::{CancelToken, JobExecutor, RuntimeLog, WorkerPool};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

const NOW: i64 = 1_700_000_000;

fn step(number: u32, do_spec: DoSpec) -> StepSpec {
    StepSpec {
        step: number,
        name: None,
        image: "alpine".to_string(),
        do_spec,
        timeout: None,
        environment: Vec::new(),
    }
}

fn request(username: &str, step_number: u32) -> JobRequest {
    JobRequest {
        uuid: "abc".to_string(),
        page_id: "1".to_string(),
        user_id: "42".to_string(),
        username: username.to_string(),
        recipe_name: "demo".to_string(),
        scope: Scope::Individual,
        cookbook_id: None,
        app_id: None,
        step: step(step_number, DoSpec::Now),
        env: BTreeMap::new(),
        continuation: Vec::new(),
    }
}

fn open_scheduler(root: &Path, policy: RetryPolicy) -> Scheduler {
    let store = QueueStore::new(QueuePaths::from_queues_root(&root.join("queues")));
    Scheduler::open(store, policy, RuntimeLog::tracing_only(), NOW).expect("open scheduler")
}

#[derive(Default)]
struct Stats {
    active_total: AtomicUsize,
    max_total: AtomicUsize,
    active_by_key: Mutex<HashMap<String, usize>>,
    max_same_key: AtomicUsize,
    order: Mutex<Vec<String>>,
}

struct TrackingExecutor {
    stats: Arc<Stats>,
}

impl JobExecutor for TrackingExecutor {
    fn execute(&self, entry: &lemc::queue::QueueEntry, _cancel: &CancelToken) -> RunResult {
        let total = self.stats.active_total.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_total.fetch_max(total, Ordering::SeqCst);
        {
            let mut by_key = self.stats.active_by_key.lock().expect("lock");
            let count = by_key.entry(entry.key.clone()).or_insert(0);
            *count += 1;
            self.stats.max_same_key.fetch_max(*count, Ordering::SeqCst);
        }
        self.stats
            .order
            .lock()
            .expect("lock")
            .push(entry.id.clone());

        thread::sleep(Duration::from_millis(30));

        {
            let mut by_key = self.stats.active_by_key.lock().expect("lock");
            if let Some(count) = by_key.get_mut(&entry.key) {
                *count -= 1;
            }
        }
        self.stats.active_total.fetch_sub(1, Ordering::SeqCst);
        RunResult::success()
    }
}

#[test]
fn same_key_entries_never_run_concurrently() {
    let dir = tempdir().expect("tempdir");
    let mut scheduler = open_scheduler(dir.path(), RetryPolicy::default());
    let mut alice_ids = Vec::new();
    for _ in 0..3 {
        let entry = scheduler
            .enqueue(request("alice", 1), Schedule::Now, NOW)
            .expect("enqueue alice");
        alice_ids.push(entry.id);
    }
    scheduler
        .enqueue(request("bob", 1), Schedule::Now, NOW)
        .expect("enqueue bob");

    let stats = Arc::new(Stats::default());
    let executor = TrackingExecutor {
        stats: Arc::clone(&stats),
    };
    let mut pool = WorkerPool::new(
        executor,
        2,
        Duration::from_millis(10),
        RuntimeLog::tracing_only(),
    );
    let processed = pool.drain(&mut scheduler, || NOW).expect("drain");

    assert_eq!(processed, 4);
    assert_eq!(stats.max_same_key.load(Ordering::SeqCst), 1);
    assert!(stats.max_total.load(Ordering::SeqCst) <= 2);
    let order = stats.order.lock().expect("lock").clone();
    let alice_order: Vec<String> = order
        .into_iter()
        .filter(|id| alice_ids.contains(id))
        .collect();
    assert_eq!(alice_order, alice_ids);
    assert_eq!(scheduler.pending_len(), 0);
    assert_eq!(scheduler.running_len(), 0);
}

#[test]
fn failing_every_entry_keeps_recurring_with_non_decreasing_schedule() {
    let dir = tempdir().expect("tempdir");
    let policy = RetryPolicy {
        max_attempts: 3,
        backoff_base_secs: 5,
        backoff_max_secs: 40,
        recurring_retry_cap: 2,
    };
    let mut scheduler = open_scheduler(dir.path(), policy);
    let mut every = request("alice", 3);
    every.step = step(3, DoSpec::parse("every.1.minute").expect("do spec"));
    let entry = scheduler
        .enqueue(
            every,
            Schedule::Every {
                interval_secs: 60,
                scheduled_at: NOW + 60,
            },
            NOW,
        )
        .expect("enqueue");

    let mut now = NOW + 60;
    let mut last_next_run = now;
    let mut rescheduled = 0;
    for _ in 0..12 {
        let runnable = scheduler.next_runnable(now, 4).expect("next runnable");
        assert_eq!(runnable.len(), 1, "entry should be due at {now}");
        let completion = scheduler
            .complete(
                &runnable[0].id,
                RunResult::Failed(RunFailure::transient("exit 1")),
                now,
            )
            .expect("complete");
        if matches!(completion, Completion::Rescheduled { .. }) {
            rescheduled += 1;
        }
        assert_ne!(completion, Completion::Failed);

        let status = scheduler.status_of(&entry.key).expect("status");
        assert_eq!(status.status, EntryStatus::Pending);
        let next_run = status.next_run_at.expect("next run");
        assert!(next_run >= last_next_run, "{next_run} < {last_next_run}");
        assert!(next_run > now);
        last_next_run = next_run;
        now = next_run;
    }
    assert!(rescheduled >= 3, "recurring entry should outlive its retry cap");
    assert_eq!(scheduler.pending_len(), 1);
}

#[test]
fn now_entries_retry_then_fail_terminally_into_failed_dir() {
    let dir = tempdir().expect("tempdir");
    let policy = RetryPolicy {
        max_attempts: 2,
        backoff_base_secs: 5,
        backoff_max_secs: 40,
        recurring_retry_cap: 1,
    };
    let mut scheduler = open_scheduler(dir.path(), policy);
    let entry = scheduler
        .enqueue(request("alice", 1), Schedule::Now, NOW)
        .expect("enqueue");

    let first = scheduler.next_runnable(NOW, 1).expect("runnable");
    let completion = scheduler
        .complete(
            &first[0].id,
            RunResult::Failed(RunFailure::transient("boom")),
            NOW,
        )
        .expect("complete");
    assert_eq!(completion, Completion::Retrying { retry_at: NOW + 5 });
    assert!(scheduler.next_runnable(NOW + 4, 1).expect("early").is_empty());

    let second = scheduler.next_runnable(NOW + 5, 1).expect("runnable");
    let completion = scheduler
        .complete(
            &second[0].id,
            RunResult::Failed(RunFailure::transient("boom")),
            NOW + 5,
        )
        .expect("complete");
    assert_eq!(completion, Completion::Failed);

    let failed = scheduler.store().list_failed().expect("failed");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, entry.id);
    assert_eq!(failed[0].last_error.as_deref(), Some("boom"));
}

#[test]
fn now_steps_chain_and_carry_exports() {
    let dir = tempdir().expect("tempdir");
    let mut scheduler = open_scheduler(dir.path(), RetryPolicy::default());
    let trigger = RecipeTrigger {
        uuid: "abc".to_string(),
        page_id: "1".to_string(),
        user_id: "42".to_string(),
        username: "alice".to_string(),
        scope: Scope::Individual,
        cookbook_id: None,
        app_id: None,
        env: BTreeMap::from([("BASE".to_string(), "1".to_string())]),
        recipe: Recipe {
            name: "demo".to_string(),
            description: String::new(),
            steps: vec![
                step(1, DoSpec::Now),
                step(2, DoSpec::Now),
                step(3, DoSpec::parse("in.5.minutes").expect("do spec")),
            ],
        },
    };
    let entries = scheduler.submit_recipe(&trigger, NOW).expect("submit");
    assert_eq!(entries.len(), 2);

    let first = scheduler.next_runnable(NOW, 4).expect("runnable");
    assert_eq!(first.len(), 1, "only the first now step and no due in step");
    assert_eq!(first[0].request.step.step, 1);
    scheduler
        .complete(
            &first[0].id,
            RunResult::Succeeded {
                exports: BTreeMap::from([("TOKEN".to_string(), "xyz".to_string())]),
            },
            NOW,
        )
        .expect("complete");

    let second = scheduler.next_runnable(NOW, 4).expect("runnable");
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].request.step.step, 2);
    assert_eq!(second[0].request.env.get("TOKEN").map(String::as_str), Some("xyz"));
    assert_eq!(second[0].request.env.get("BASE").map(String::as_str), Some("1"));
}

#[test]
fn cancel_removes_pending_entries_before_dispatch() {
    let dir = tempdir().expect("tempdir");
    let mut scheduler = open_scheduler(dir.path(), RetryPolicy::default());
    let entry = scheduler
        .enqueue(request("alice", 1), Schedule::Now, NOW)
        .expect("enqueue");

    let outcome = scheduler.cancel(&entry.key, NOW).expect("cancel");
    assert_eq!(outcome.removed_pending, 1);
    assert!(!outcome.in_flight);
    assert!(scheduler.next_runnable(NOW, 4).expect("runnable").is_empty());
    let status = scheduler.status_of(&entry.key).expect("status");
    assert_eq!(status.status, EntryStatus::Failed);
    assert_eq!(status.last_error.as_deref(), Some("cancelled"));
}

#[test]
fn restart_resets_running_entries_to_pending() {
    let dir = tempdir().expect("tempdir");
    let key = {
        let mut scheduler = open_scheduler(dir.path(), RetryPolicy::default());
        let entry = scheduler
            .enqueue(request("alice", 1), Schedule::Now, NOW)
            .expect("enqueue");
        let running = scheduler.next_runnable(NOW, 1).expect("runnable");
        assert_eq!(running.len(), 1);
        entry.key
    };

    let mut reopened = open_scheduler(dir.path(), RetryPolicy::default());
    assert_eq!(reopened.pending_len(), 1);
    let status = reopened.status_of(&key).expect("status");
    assert_eq!(status.status, EntryStatus::Pending);
    assert_eq!(reopened.next_runnable(NOW, 1).expect("runnable").len(), 1);
}

fn every_trigger(username: &str) -> RecipeTrigger {
    RecipeTrigger {
        uuid: "abc".to_string(),
        page_id: "1".to_string(),
        user_id: "42".to_string(),
        username: username.to_string(),
        scope: Scope::Individual,
        cookbook_id: None,
        app_id: None,
        env: BTreeMap::new(),
        recipe: Recipe {
            name: "demo".to_string(),
            description: String::new(),
            steps: vec![step(1, DoSpec::parse("every.10.seconds").expect("do spec"))],
        },
    }
}

fn live_entries_for(scheduler: &Scheduler, key: &str) -> usize {
    scheduler.entries().filter(|entry| entry.key == key).count()
}

#[test]
fn resubmitting_while_a_recurring_run_is_in_flight_keeps_one_entry() {
    let dir = tempdir().expect("tempdir");
    let mut scheduler = open_scheduler(dir.path(), RetryPolicy::default());
    scheduler
        .submit_recipe(&every_trigger("alice"), NOW)
        .expect("submit");
    let running = scheduler.next_runnable(NOW + 10, 4).expect("runnable");
    assert_eq!(running.len(), 1);
    let key = running[0].key.clone();

    for offset in [10, 11] {
        scheduler
            .submit_recipe(&every_trigger("alice"), NOW + offset)
            .expect("resubmit");
    }
    let completion = scheduler
        .complete(&running[0].id, RunResult::success(), NOW + 12)
        .expect("complete");

    assert_eq!(completion, Completion::Superseded);
    assert_eq!(live_entries_for(&scheduler, &key), 1);
    assert_eq!(scheduler.store().list_entries().expect("entries").len(), 1);
    let status = scheduler.status_of(&key).expect("status");
    assert_eq!(status.status, EntryStatus::Pending);
}

#[test]
fn cancelling_a_running_recurring_entry_stops_it_for_good() {
    let dir = tempdir().expect("tempdir");
    let mut scheduler = open_scheduler(dir.path(), RetryPolicy::default());
    scheduler
        .submit_recipe(&every_trigger("alice"), NOW)
        .expect("submit");
    let running = scheduler.next_runnable(NOW + 10, 4).expect("runnable");
    let key = running[0].key.clone();

    let outcome = scheduler.cancel(&key, NOW + 10).expect("cancel");
    assert!(outcome.in_flight);
    let completion = scheduler
        .complete(&running[0].id, RunResult::success(), NOW + 11)
        .expect("complete");

    assert_eq!(completion, Completion::Failed);
    assert_eq!(live_entries_for(&scheduler, &key), 0);
    let failed = scheduler.store().list_failed().expect("failed");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].last_error.as_deref(), Some("cancelled"));
}

fn block_entry_file(scheduler: &Scheduler, id: &str) -> std::path::PathBuf {
    let path = scheduler
        .store()
        .paths()
        .entries
        .join(format!("{id}.json"));
    std::fs::remove_file(&path).expect("remove entry file");
    std::fs::create_dir(&path).expect("blocking dir");
    std::fs::write(path.join("keep"), "x").expect("fill blocking dir");
    path
}

#[test]
fn failed_claim_write_releases_unclaimed_keys() {
    let dir = tempdir().expect("tempdir");
    let mut scheduler = open_scheduler(dir.path(), RetryPolicy::default());
    let alice = scheduler
        .enqueue(request("alice", 1), Schedule::Now, NOW)
        .expect("enqueue");
    let bob = scheduler
        .enqueue(request("bob", 1), Schedule::Now, NOW)
        .expect("enqueue");
    let carol = scheduler
        .enqueue(request("carol", 1), Schedule::Now, NOW)
        .expect("enqueue");
    let blocker = block_entry_file(&scheduler, &bob.id);

    let claimed = scheduler.next_runnable(NOW, 3).expect("partial claim");
    let ids: Vec<&str> = claimed.iter().map(|entry| entry.id.as_str()).collect();
    assert_eq!(ids, vec![alice.id.as_str()]);
    assert_eq!(scheduler.running_len(), 1);

    std::fs::remove_dir_all(&blocker).expect("unblock");
    let claimed = scheduler.next_runnable(NOW + 1, 3).expect("claim");
    let ids: Vec<&str> = claimed.iter().map(|entry| entry.id.as_str()).collect();
    assert_eq!(ids, vec![bob.id.as_str(), carol.id.as_str()]);
}

#[test]
fn failed_completion_write_keeps_the_entry_schedulable() {
    let dir = tempdir().expect("tempdir");
    let policy = RetryPolicy {
        max_attempts: 3,
        backoff_base_secs: 5,
        backoff_max_secs: 40,
        recurring_retry_cap: 1,
    };
    let mut scheduler = open_scheduler(dir.path(), policy);
    let entry = scheduler
        .enqueue(request("alice", 1), Schedule::Now, NOW)
        .expect("enqueue");
    scheduler.next_runnable(NOW, 1).expect("runnable");
    let blocker = block_entry_file(&scheduler, &entry.id);

    scheduler
        .complete(
            &entry.id,
            RunResult::Failed(RunFailure::transient("boom")),
            NOW,
        )
        .expect_err("write should fail");
    assert_eq!(scheduler.pending_len(), 1);
    assert_eq!(scheduler.running_len(), 0);

    std::fs::remove_dir_all(&blocker).expect("unblock");
    let retried = scheduler.next_runnable(NOW + 5, 1).expect("runnable");
    assert_eq!(retried.len(), 1);
    assert_eq!(retried[0].id, entry.id);
    assert_eq!(retried[0].attempt, 1);
}

#[test]
fn now_entries_run_before_due_delayed_entries() {
    let dir = tempdir().expect("tempdir");
    let mut scheduler = open_scheduler(dir.path(), RetryPolicy::default());
    scheduler
        .enqueue(request("alice", 1), Schedule::In { scheduled_at: NOW }, NOW)
        .expect("enqueue in");
    let now_entry = scheduler
        .enqueue(request("bob", 1), Schedule::Now, NOW)
        .expect("enqueue now");

    let first = scheduler.next_runnable(NOW, 1).expect("runnable");
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].id, now_entry.id);
}

#[test]
fn delayed_entries_wait_for_their_time_and_run_once() {
    let dir = tempdir().expect("tempdir");
    let mut scheduler = open_scheduler(dir.path(), RetryPolicy::default());
    let entry = scheduler
        .enqueue(
            request("alice", 1),
            Schedule::In {
                scheduled_at: NOW + 30,
            },
            NOW,
        )
        .expect("enqueue");

    assert!(scheduler.next_runnable(NOW + 29, 4).expect("early").is_empty());
    let due = scheduler.next_runnable(NOW + 30, 4).expect("due");
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, entry.id);

    let completion = scheduler
        .complete(&entry.id, RunResult::success(), NOW + 31)
        .expect("complete");
    assert_eq!(completion, Completion::Succeeded);
    assert_eq!(scheduler.entries().count(), 0);
    assert!(scheduler.store().list_entries().expect("entries").is_empty());
    assert!(scheduler.next_runnable(NOW + 1000, 4).expect("later").is_empty());
}
