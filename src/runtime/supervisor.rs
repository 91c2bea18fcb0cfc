use super::worker_pool::{JobExecutor, WorkerPool};
use super::{bootstrap_paths, LemcPaths, RuntimeError, RuntimeLog};
use crate::config::Settings;
use crate::queue::{QueueStore, RetryPolicy, Scheduler};
use crate::shared::fs_atomic::atomic_write_json;
use crate::shared::time::now_secs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ServeState {
    pub running: bool,
    pub pid: Option<u32>,
    pub started_at: Option<i64>,
    pub stopped_at: Option<i64>,
    pub worker_limit: usize,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipState {
    NotRunning,
    Running { pid: u32 },
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopResult {
    pub pid: u32,
    pub forced: bool,
}

/// Serves the queue in the foreground until a stop file appears.
pub fn run_serve<E: JobExecutor>(
    paths: &LemcPaths,
    settings: &Settings,
    executor: E,
) -> Result<(), RuntimeError> {
    bootstrap_paths(paths)?;
    match ownership_state(paths)? {
        OwnershipState::Running { pid } => return Err(RuntimeError::AlreadyRunning { pid }),
        OwnershipState::Stale => cleanup_stale(paths)?,
        OwnershipState::NotRunning => {}
    }
    reserve_lock(paths)?;
    let _ = fs::remove_file(paths.stop_signal_path());

    let log = RuntimeLog::new(paths.runtime_log_path());
    let worker_limit = settings.scheduler.worker_limit;
    let mut state = ServeState {
        running: true,
        pid: Some(std::process::id()),
        started_at: Some(now_secs()),
        stopped_at: None,
        worker_limit,
        last_error: None,
    };
    save_serve_state(paths, &state)?;
    log.info(
        "serve.started",
        &format!("pid={} workers={worker_limit}", std::process::id()),
    );

    let outcome = serve_until_stopped(paths, settings, executor, log.clone());
    if let Err(err) = &outcome {
        state.last_error = Some(err.to_string());
        log.error("serve.failed", &err.to_string());
    }

    state.running = false;
    state.pid = None;
    state.stopped_at = Some(now_secs());
    save_serve_state(paths, &state)?;
    clear_lock(paths);
    let _ = fs::remove_file(paths.stop_signal_path());
    log.info("serve.stopped", "runtime stopped");
    outcome
}

fn serve_until_stopped<E: JobExecutor>(
    paths: &LemcPaths,
    settings: &Settings,
    executor: E,
    log: RuntimeLog,
) -> Result<(), RuntimeError> {
    let store = QueueStore::new(paths.queue_paths());
    let policy = RetryPolicy::from_settings(&settings.scheduler);
    let mut scheduler = Scheduler::open(store, policy, log.clone(), now_secs())?;
    let poll = Duration::from_millis(settings.scheduler.poll_interval_ms);
    let mut pool = WorkerPool::new(executor, settings.scheduler.worker_limit, poll, log.clone());

    let stop = Arc::new(AtomicBool::new(false));
    let done = Arc::new(AtomicBool::new(false));
    let watcher = {
        let stop = Arc::clone(&stop);
        let done = Arc::clone(&done);
        let stop_path = paths.stop_signal_path();
        thread::spawn(move || {
            while !done.load(Ordering::Relaxed) {
                if stop_path.exists() {
                    log.info("serve.stop.signal", "stop file detected");
                    stop.store(true, Ordering::Relaxed);
                    return;
                }
                thread::sleep(Duration::from_millis(50));
            }
        })
    };

    let outcome = pool.run(&mut scheduler, &stop, now_secs);
    done.store(true, Ordering::Relaxed);
    let _ = watcher.join();
    outcome
}

pub fn load_serve_state(paths: &LemcPaths) -> Result<ServeState, RuntimeError> {
    let path = paths.serve_state_path();
    if !path.exists() {
        return Ok(ServeState::default());
    }
    let raw = fs::read_to_string(&path).map_err(|source| RuntimeError::ReadState {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| RuntimeError::ParseState {
        path: path.display().to_string(),
        source,
    })
}

pub fn save_serve_state(paths: &LemcPaths, state: &ServeState) -> Result<(), RuntimeError> {
    let path = paths.serve_state_path();
    atomic_write_json(&path, state).map_err(|source| RuntimeError::WriteState {
        path: path.display().to_string(),
        source,
    })
}

pub fn ownership_state(paths: &LemcPaths) -> Result<OwnershipState, RuntimeError> {
    if let Some(pid) = read_lock_pid(paths)? {
        if is_process_alive(pid) {
            return Ok(OwnershipState::Running { pid });
        }
        return Ok(OwnershipState::Stale);
    }
    let state = load_serve_state(paths)?;
    if state.running || state.pid.is_some() {
        return Ok(OwnershipState::Stale);
    }
    Ok(OwnershipState::NotRunning)
}

pub fn cleanup_stale(paths: &LemcPaths) -> Result<(), RuntimeError> {
    clear_lock(paths);
    let _ = fs::remove_file(paths.stop_signal_path());
    let mut state = load_serve_state(paths)?;
    state.running = false;
    state.pid = None;
    state.stopped_at = Some(now_secs());
    save_serve_state(paths, &state)
}

fn reserve_lock(paths: &LemcPaths) -> Result<(), RuntimeError> {
    let path = paths.serve_lock_path();
    fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&path)
        .and_then(|mut file| file.write_all(std::process::id().to_string().as_bytes()))
        .map_err(|source| RuntimeError::WriteLock {
            path: path.display().to_string(),
            source,
        })
}

fn clear_lock(paths: &LemcPaths) {
    let _ = fs::remove_file(paths.serve_lock_path());
}

fn read_lock_pid(paths: &LemcPaths) -> Result<Option<u32>, RuntimeError> {
    let path = paths.serve_lock_path();
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path).map_err(|source| RuntimeError::ReadLock {
        path: path.display().to_string(),
        source,
    })?;
    Ok(raw.trim().parse::<u32>().ok())
}

pub fn signal_stop(paths: &LemcPaths) -> Result<(), RuntimeError> {
    let path = paths.stop_signal_path();
    fs::write(&path, b"stop").map_err(|source| RuntimeError::WriteState {
        path: path.display().to_string(),
        source,
    })
}

/// Asks a running `serve` to stop, escalating to TERM and then KILL when it
/// does not exit within `timeout`.
pub fn stop_serve(paths: &LemcPaths, timeout: Duration) -> Result<StopResult, RuntimeError> {
    let pid = match ownership_state(paths)? {
        OwnershipState::Running { pid } => pid,
        OwnershipState::Stale => {
            cleanup_stale(paths)?;
            return Err(RuntimeError::NotRunning);
        }
        OwnershipState::NotRunning => return Err(RuntimeError::NotRunning),
    };

    signal_stop(paths)?;
    let log = RuntimeLog::new(paths.runtime_log_path());
    log.info("serve.stop.requested", &format!("pid={pid}"));

    if wait_for_exit(pid, timeout) {
        return Ok(StopResult { pid, forced: false });
    }
    send_signal(pid, "-TERM");
    if !wait_for_exit(pid, Duration::from_secs(2)) {
        log.warn("serve.stop.force_kill", &format!("pid={pid}"));
        send_signal(pid, "-KILL");
        if !wait_for_exit(pid, Duration::from_secs(2)) {
            log.error(
                "serve.stop.failed",
                &format!("pid={pid} remained alive after TERM/KILL"),
            );
            return Err(RuntimeError::StopFailedAlive { pid });
        }
    }
    cleanup_stale(paths)?;
    Ok(StopResult { pid, forced: true })
}

fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let start = Instant::now();
    while is_process_alive(pid) && start.elapsed() < timeout {
        thread::sleep(Duration::from_millis(100));
    }
    !is_process_alive(pid)
}

pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }

    #[cfg(unix)]
    {
        Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        false
    }
}

fn send_signal(pid: u32, signal: &str) {
    #[cfg(unix)]
    {
        let _ = Command::new("kill")
            .arg(signal)
            .arg(pid.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }

    #[cfg(not(unix))]
    {
        let _ = (pid, signal);
    }
}
