use lemc::config::Settings;
use lemc::dispatch::{
    ContainerError, ContainerRuntime, DispatchOptions, Dispatcher, DockerCli, OutputStream,
    RunSpec, RunningContainer, StepExecutor, Termination,
};
use lemc::identity::{resolve_file_meta, JobMeta, Scope};
use lemc::queue::{
    EntryStatus, FailureKind, JobRequest, QueueEntry, RunResult, Schedule,
};
use lemc::recipe::{DoSpec, StepSpec};
use lemc::runtime::{CancelToken, RuntimeLog};
use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).expect("write script");
    let mut perms = fs::metadata(path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod");
}

fn job() -> JobMeta {
    JobMeta {
        uuid: "abc".to_string(),
        page_id: "1".to_string(),
        step_id: "2".to_string(),
        user_id: "42".to_string(),
        username: "alice".to_string(),
        recipe_name: "My Recipe".to_string(),
        scope: Scope::Individual,
    }
}

fn options(timeout: Duration) -> DispatchOptions {
    DispatchOptions {
        timeout,
        stop_grace: Duration::from_millis(100),
        default_registry: "docker.io".to_string(),
        host_locker_root: None,
        env: BTreeMap::from([("GREETING".to_string(), "hi".to_string())]),
        cancel: CancelToken::default(),
    }
}

#[derive(Default)]
struct FakeRuntime {
    stdout: String,
    stderr: String,
    exit_code: i32,
    hang: bool,
    /// Stdout yields its text, then blocks instead of reaching end of file.
    stdout_stalls: bool,
    started: Mutex<Vec<RunSpec>>,
    removed: Mutex<Vec<String>>,
    stopped: Arc<AtomicBool>,
}

struct FakeContainer {
    stdout: Option<OutputStream>,
    stderr: Option<OutputStream>,
    exit_code: i32,
    hang: bool,
    stopped: Arc<AtomicBool>,
}

impl ContainerRuntime for FakeRuntime {
    fn remove_stale(&self, name: &str) -> Result<(), ContainerError> {
        self.removed.lock().expect("lock").push(name.to_string());
        Ok(())
    }

    fn start(&self, spec: &RunSpec) -> Result<Box<dyn RunningContainer>, ContainerError> {
        self.started.lock().expect("lock").push(spec.clone());
        let stdout: OutputStream = if self.stdout_stalls {
            Box::new(StalledStream {
                text: Cursor::new(self.stdout.clone().into_bytes()),
            })
        } else {
            Box::new(Cursor::new(self.stdout.clone().into_bytes()))
        };
        Ok(Box::new(FakeContainer {
            stdout: Some(stdout),
            stderr: Some(Box::new(Cursor::new(self.stderr.clone().into_bytes()))),
            exit_code: self.exit_code,
            hang: self.hang,
            stopped: Arc::clone(&self.stopped),
        }))
    }
}

struct StalledStream {
    text: Cursor<Vec<u8>>,
}

impl Read for StalledStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let read = self.text.read(buf)?;
        if read == 0 {
            std::thread::sleep(Duration::from_secs(60));
        }
        Ok(read)
    }
}

impl RunningContainer for FakeContainer {
    fn take_stdout(&mut self) -> Option<OutputStream> {
        self.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<OutputStream> {
        self.stderr.take()
    }

    fn try_wait(&mut self) -> Result<Option<i32>, ContainerError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(Some(143));
        }
        if self.hang {
            return Ok(None);
        }
        Ok(Some(self.exit_code))
    }

    fn stop(&mut self, _grace: Duration) -> Result<(), ContainerError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn kill(&mut self) -> Result<(), ContainerError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn dispatch_applies_protocol_logs_output_and_injects_identity() {
    let dir = tempdir().expect("tempdir");
    let runtime = FakeRuntime {
        stdout: "lemc.html.trunc; <div>hi</div>\nlemc.html.append; <br>\nlemc.env; TOKEN=xyz\nhello\n"
            .to_string(),
        stderr: "careful\n".to_string(),
        ..FakeRuntime::default()
    };
    let dispatcher = Dispatcher::new(runtime, RuntimeLog::tracing_only());
    let meta = resolve_file_meta(&job(), false, dir.path()).expect("file meta");

    let outcome = dispatcher
        .dispatch(&job(), &meta, "python:3.12", &options(Duration::from_secs(5)))
        .expect("dispatch");

    assert_eq!(outcome.termination, Termination::Exited(0));
    assert!(outcome.succeeded());
    assert_eq!(outcome.commands_applied, 2);
    assert_eq!(outcome.exports.get("TOKEN").map(String::as_str), Some("xyz"));
    assert_eq!(
        outcome.container_name,
        "uuid-abc-page-1-recipe-my-recipe-step-2-scope-individual-username-alice"
    );

    let html = fs::read_to_string(meta.page_dir().join("cache/cache.html")).expect("html");
    assert_eq!(html, "<div>hi</div>\n<br>\n");

    let log_dir = meta.logs_dir();
    let log_file = fs::read_dir(&log_dir)
        .expect("logs dir")
        .next()
        .expect("one log file")
        .expect("entry")
        .path();
    let log = fs::read_to_string(log_file).expect("read log");
    assert!(log.contains("hello"));
    assert!(log.contains("[stderr] careful"));
    assert!(log.contains("[step:2]"));
    assert!(log.contains("container exited with code 0"));

    let runtime = dispatcher.runtime();
    assert_eq!(
        runtime.removed.lock().expect("lock").as_slice(),
        [outcome.container_name.clone()]
    );
    let started = runtime.started.lock().expect("lock");
    let spec = &started[0];
    assert_eq!(spec.image.reference(), "docker.io/library/python:3.12");
    assert_eq!(spec.env.get("LEMC_USERNAME").map(String::as_str), Some("alice"));
    assert_eq!(spec.env.get("GREETING").map(String::as_str), Some("hi"));
    assert_eq!(spec.env.get("PYTHONUNBUFFERED").map(String::as_str), Some("1"));
    assert_eq!(spec.mounts.len(), 5);
}

#[test]
fn hanging_container_times_out_and_is_stopped() {
    let dir = tempdir().expect("tempdir");
    let runtime = FakeRuntime {
        hang: true,
        ..FakeRuntime::default()
    };
    let dispatcher = Dispatcher::new(runtime, RuntimeLog::tracing_only());
    let meta = resolve_file_meta(&job(), false, dir.path()).expect("file meta");

    let outcome = dispatcher
        .dispatch(&job(), &meta, "alpine", &options(Duration::from_millis(200)))
        .expect("dispatch");
    assert_eq!(outcome.termination, Termination::TimedOut);
    assert!(!outcome.succeeded());
    assert!(dispatcher.runtime().stopped.load(Ordering::SeqCst));
}

#[test]
fn cancelled_run_stops_the_container() {
    let dir = tempdir().expect("tempdir");
    let runtime = FakeRuntime {
        hang: true,
        ..FakeRuntime::default()
    };
    let dispatcher = Dispatcher::new(runtime, RuntimeLog::tracing_only());
    let meta = resolve_file_meta(&job(), false, dir.path()).expect("file meta");
    let opts = options(Duration::from_secs(30));
    opts.cancel.cancel();

    let outcome = dispatcher
        .dispatch(&job(), &meta, "alpine", &opts)
        .expect("dispatch");
    assert_eq!(outcome.termination, Termination::Cancelled);
}

fn queue_entry(image: &str) -> QueueEntry {
    QueueEntry {
        id: "job-1".to_string(),
        key: "key".to_string(),
        request: JobRequest {
            uuid: "abc".to_string(),
            page_id: "1".to_string(),
            user_id: "42".to_string(),
            username: "alice".to_string(),
            recipe_name: "My Recipe".to_string(),
            scope: Scope::Individual,
            cookbook_id: None,
            app_id: None,
            step: StepSpec {
                step: 2,
                name: None,
                image: image.to_string(),
                do_spec: DoSpec::Now,
                timeout: None,
                environment: vec!["MODE=fast".to_string()],
            },
            env: BTreeMap::new(),
            continuation: Vec::new(),
        },
        schedule: Schedule::Now,
        attempt: 0,
        status: EntryStatus::Running,
        last_error: None,
        retry_at: None,
        seq: 1,
        created_at: 0,
        updated_at: 0,
    }
}

#[test]
fn step_executor_classifies_failures() {
    let dir = tempdir().expect("tempdir");
    let settings = Settings::default();

    let failing = FakeRuntime {
        exit_code: 3,
        ..FakeRuntime::default()
    };
    let executor = StepExecutor::new(
        Dispatcher::new(failing, RuntimeLog::tracing_only()),
        dir.path().to_path_buf(),
        &settings,
    );
    match executor.run_entry(&queue_entry("alpine"), &CancelToken::default()) {
        RunResult::Failed(failure) => {
            assert_eq!(failure.kind, FailureKind::Transient);
            assert!(failure.message.contains("code 3"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    let started = executor.dispatcher().runtime().started.lock().expect("lock");
    assert_eq!(started[0].env.get("MODE").map(String::as_str), Some("fast"));
    drop(started);

    match executor.run_entry(&queue_entry("Not A/Valid Image"), &CancelToken::default()) {
        RunResult::Failed(failure) => assert_eq!(failure.kind, FailureKind::Configuration),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn docker_cli_drives_the_binary_with_env_from_the_client_environment() {
    let dir = tempdir().expect("tempdir");
    let calls = dir.path().join("calls.txt");
    let bin = dir.path().join("docker-mock");
    write_script(
        &bin,
        &format!(
            "#!/bin/sh\necho \"$1 $2\" >> {calls}\nif [ \"$1\" = \"run\" ]; then\n  echo \"lemc.html.trunc; <p>$LEMC_USERNAME $GREETING</p>\"\n  echo \"oops\" >&2\nfi\nexit 0\n",
            calls = calls.display()
        ),
    );

    let dispatcher = Dispatcher::new(
        DockerCli::new(bin.display().to_string(), None),
        RuntimeLog::tracing_only(),
    );
    let meta = resolve_file_meta(&job(), false, &dir.path().join("locker")).expect("file meta");
    let outcome = dispatcher
        .dispatch(&job(), &meta, "alpine", &options(Duration::from_secs(10)))
        .expect("dispatch");

    assert_eq!(outcome.termination, Termination::Exited(0));
    let html = fs::read_to_string(meta.page_dir().join("cache/cache.html")).expect("html");
    assert_eq!(html, "<p>alice hi</p>");
    let calls = fs::read_to_string(&calls).expect("calls");
    let lines: Vec<&str> = calls.lines().collect();
    assert_eq!(lines, vec!["rm -f", "run --rm"]);
}

#[test]
fn docker_cli_reports_missing_binary() {
    let dir = tempdir().expect("tempdir");
    let dispatcher = Dispatcher::new(
        DockerCli::new(dir.path().join("nope").display().to_string(), None),
        RuntimeLog::tracing_only(),
    );
    let meta = resolve_file_meta(&job(), false, dir.path()).expect("file meta");
    let err = dispatcher
        .dispatch(&job(), &meta, "alpine", &options(Duration::from_secs(1)))
        .expect_err("missing binary");
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("not found"));
}

#[test]
fn output_still_buffered_at_exit_is_applied_in_full() {
    let dir = tempdir().expect("tempdir");
    let lines = 1_000_000;
    let mut stdout = String::with_capacity(lines * 24);
    for index in 0..lines {
        stdout.push_str(&format!("lemc.html.append; {index}\n"));
    }
    let runtime = FakeRuntime {
        stdout,
        ..FakeRuntime::default()
    };
    let dispatcher = Dispatcher::new(runtime, RuntimeLog::tracing_only());
    let meta = resolve_file_meta(&job(), false, dir.path()).expect("file meta");

    let outcome = dispatcher
        .dispatch(&job(), &meta, "alpine", &options(Duration::from_secs(120)))
        .expect("dispatch");

    assert_eq!(outcome.termination, Termination::Exited(0));
    assert_eq!(outcome.commands_applied, lines);
    assert!(outcome.succeeded());
    let html = fs::read_to_string(meta.page_dir().join("cache/cache.html")).expect("html");
    assert_eq!(html.lines().count(), lines);
    assert_eq!(html.lines().last(), Some("999999"));
}

#[test]
fn stream_left_open_after_exit_marks_the_run_truncated() {
    let dir = tempdir().expect("tempdir");
    let runtime = FakeRuntime {
        stdout: "lemc.html.trunc; <p>partial</p>\n".to_string(),
        stdout_stalls: true,
        ..FakeRuntime::default()
    };
    let dispatcher = Dispatcher::new(runtime, RuntimeLog::tracing_only());
    let meta = resolve_file_meta(&job(), false, dir.path()).expect("file meta");

    let outcome = dispatcher
        .dispatch(&job(), &meta, "alpine", &options(Duration::from_secs(30)))
        .expect("dispatch");

    assert_eq!(outcome.termination, Termination::Exited(0));
    assert_eq!(outcome.commands_applied, 1);
    assert!(!outcome.succeeded());
    assert!(outcome
        .cache_error
        .as_deref()
        .is_some_and(|err| err.contains("truncated")));
    let html = fs::read_to_string(meta.page_dir().join("cache/cache.html")).expect("html");
    assert_eq!(html, "<p>partial</p>");
}
