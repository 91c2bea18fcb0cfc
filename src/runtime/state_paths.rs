use super::RuntimeError;
use crate::config::Settings;
use crate::queue::QueuePaths;
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk layout of one environment root (`{data_root}/{environment}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LemcPaths {
    pub root: PathBuf,
}

impl LemcPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.env_root())
    }

    pub fn required_directories(&self) -> Vec<PathBuf> {
        vec![
            self.locker_root(),
            self.queues_root(),
            self.logs_dir(),
            self.daemon_dir(),
        ]
    }

    pub fn locker_root(&self) -> PathBuf {
        self.root.join("locker")
    }

    pub fn queues_root(&self) -> PathBuf {
        self.locker_root().join("queues")
    }

    pub fn queue_paths(&self) -> QueuePaths {
        QueuePaths::from_queues_root(&self.queues_root())
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn daemon_dir(&self) -> PathBuf {
        self.root.join("daemon")
    }

    pub fn runtime_log_path(&self) -> PathBuf {
        self.logs_dir().join("runtime.log")
    }

    pub fn serve_lock_path(&self) -> PathBuf {
        self.daemon_dir().join("serve.lock")
    }

    pub fn serve_state_path(&self) -> PathBuf {
        self.daemon_dir().join("runtime.json")
    }

    pub fn stop_signal_path(&self) -> PathBuf {
        self.daemon_dir().join("stop")
    }
}

/// Creates the directory layout and proves the locker root accepts writes.
pub fn bootstrap_paths(paths: &LemcPaths) -> Result<(), RuntimeError> {
    let locker = paths.locker_root();
    create_dir(&locker)?;
    probe_writable(&locker)?;
    for path in paths.required_directories() {
        create_dir(&path)?;
    }
    Ok(())
}

fn create_dir(path: &Path) -> Result<(), RuntimeError> {
    fs::create_dir_all(path).map_err(|source| RuntimeError::CreateDir {
        path: path.display().to_string(),
        source,
    })
}

fn probe_writable(dir: &Path) -> Result<(), RuntimeError> {
    let probe = dir.join(format!(".write-probe-{}", std::process::id()));
    fs::write(&probe, b"ok")
        .and_then(|()| fs::remove_file(&probe))
        .map_err(|source| RuntimeError::LockerNotWritable {
            path: dir.display().to_string(),
            source,
        })
}
