use super::recovery::quarantine_name;
use super::{JobStatus, QueueEntry, QueueError};
use crate::recipe::RecipeTrigger;
use crate::shared::fs_atomic::atomic_write_json;
use crate::shared::ids::generate_id;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePaths {
    pub root: PathBuf,
    pub entries: PathBuf,
    pub failed: PathBuf,
    pub incoming: PathBuf,
    pub control: PathBuf,
    pub status: PathBuf,
}

impl QueuePaths {
    pub fn from_queues_root(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            entries: root.join("entries"),
            failed: root.join("failed"),
            incoming: root.join("incoming"),
            control: root.join("control"),
            status: root.join("status.json"),
        }
    }

    pub fn directories(&self) -> Vec<&Path> {
        vec![
            self.entries.as_path(),
            self.failed.as_path(),
            self.incoming.as_path(),
            self.control.as_path(),
        ]
    }
}

/// Cross-process requests dropped into `control/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlRequest {
    Cancel { key: String },
}

#[derive(Debug, Default)]
pub struct LoadedQueue {
    pub entries: Vec<QueueEntry>,
    /// Unreadable entry files, already moved into `failed/`.
    pub quarantined: Vec<PathBuf>,
}

#[derive(Debug)]
pub enum Inbound<T> {
    Accepted(T),
    Rejected { path: PathBuf, reason: String },
}

#[derive(Debug, Clone)]
pub struct QueueStore {
    paths: QueuePaths,
}

impl QueueStore {
    pub fn new(paths: QueuePaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &QueuePaths {
        &self.paths
    }

    pub fn ensure_dirs(&self) -> Result<(), QueueError> {
        for dir in self.paths.directories() {
            fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        Ok(())
    }

    fn entry_path(&self, id: &str) -> PathBuf {
        self.paths.entries.join(format!("{id}.json"))
    }

    pub fn save(&self, entry: &QueueEntry) -> Result<(), QueueError> {
        let path = self.entry_path(&entry.id);
        atomic_write_json(&path, entry).map_err(|e| io_err(&path, e))
    }

    pub fn remove(&self, id: &str) -> Result<(), QueueError> {
        let path = self.entry_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(&path, err)),
        }
    }

    /// Records a terminal failure under `failed/` and drops the live entry.
    pub fn move_to_failed(&self, entry: &QueueEntry) -> Result<PathBuf, QueueError> {
        let path = self.paths.failed.join(format!("{}.json", entry.id));
        atomic_write_json(&path, entry).map_err(|e| io_err(&path, e))?;
        self.remove(&entry.id)?;
        Ok(path)
    }

    pub fn load_all(&self) -> Result<LoadedQueue, QueueError> {
        let mut loaded = LoadedQueue::default();
        for (index, path) in json_files_oldest_first(&self.paths.entries)?
            .into_iter()
            .enumerate()
        {
            let parsed = fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|raw| {
                    serde_json::from_str::<QueueEntry>(&raw).map_err(|e| e.to_string())
                });
            match parsed {
                Ok(entry) => loaded.entries.push(entry),
                Err(_) => loaded.quarantined.push(self.quarantine(&path, index)?),
            }
        }
        loaded.entries.sort_by_key(|entry| entry.seq);
        Ok(loaded)
    }

    /// Read-only view of live entries for other processes; unreadable files
    /// are skipped rather than quarantined.
    pub fn list_entries(&self) -> Result<Vec<QueueEntry>, QueueError> {
        let mut entries = read_entries_in(&self.paths.entries)?;
        entries.sort_by_key(|entry| entry.seq);
        Ok(entries)
    }

    pub fn list_failed(&self) -> Result<Vec<QueueEntry>, QueueError> {
        read_entries_in(&self.paths.failed)
    }

    pub fn write_status(&self, snapshot: &BTreeMap<String, JobStatus>) -> Result<(), QueueError> {
        atomic_write_json(&self.paths.status, snapshot).map_err(|e| io_err(&self.paths.status, e))
    }

    pub fn read_status(&self) -> Result<BTreeMap<String, JobStatus>, QueueError> {
        let path = &self.paths.status;
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BTreeMap::new())
            }
            Err(err) => return Err(io_err(path, err)),
        };
        serde_json::from_str(&raw).map_err(|e| parse_err(path, e))
    }

    pub fn drop_trigger(&self, trigger: &RecipeTrigger, now: i64) -> Result<PathBuf, QueueError> {
        let id = generate_id("submit", now).map_err(QueueError::Id)?;
        let path = self.paths.incoming.join(format!("{id}.json"));
        atomic_write_json(&path, trigger).map_err(|e| io_err(&path, e))?;
        Ok(path)
    }

    pub fn drop_control(&self, request: &ControlRequest, now: i64) -> Result<PathBuf, QueueError> {
        let id = generate_id("control", now).map_err(QueueError::Id)?;
        let path = self.paths.control.join(format!("{id}.json"));
        atomic_write_json(&path, request).map_err(|e| io_err(&path, e))?;
        Ok(path)
    }

    pub fn take_incoming(&self) -> Result<Vec<Inbound<RecipeTrigger>>, QueueError> {
        self.take_dir(&self.paths.incoming)
    }

    pub fn take_control(&self) -> Result<Vec<Inbound<ControlRequest>>, QueueError> {
        self.take_dir(&self.paths.control)
    }

    /// Consumes every request file in `dir`, oldest first. Unparseable files
    /// are moved into `failed/`.
    fn take_dir<T>(&self, dir: &Path) -> Result<Vec<Inbound<T>>, QueueError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let mut taken = Vec::new();
        for (index, path) in json_files_oldest_first(dir)?.into_iter().enumerate() {
            let raw = match fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(io_err(&path, err)),
            };
            match serde_json::from_str::<T>(&raw) {
                Ok(value) => {
                    fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
                    taken.push(Inbound::Accepted(value));
                }
                Err(err) => {
                    let moved = self.quarantine(&path, index)?;
                    taken.push(Inbound::Rejected {
                        path: moved,
                        reason: err.to_string(),
                    });
                }
            }
        }
        Ok(taken)
    }

    fn quarantine(&self, path: &Path, index: usize) -> Result<PathBuf, QueueError> {
        let name = path
            .file_name()
            .and_then(|v| v.to_str())
            .filter(|v| !v.trim().is_empty())
            .unwrap_or("entry.json");
        fs::create_dir_all(&self.paths.failed).map_err(|e| io_err(&self.paths.failed, e))?;
        let target = self.paths.failed.join(quarantine_name(index, name));
        fs::rename(path, &target).map_err(|e| io_err(path, e))?;
        Ok(target)
    }
}

fn read_entries_in(dir: &Path) -> Result<Vec<QueueEntry>, QueueError> {
    let mut entries = Vec::new();
    for path in json_files_oldest_first(dir)? {
        let Ok(raw) = fs::read_to_string(&path) else {
            continue;
        };
        if let Ok(entry) = serde_json::from_str::<QueueEntry>(&raw) {
            entries.push(entry);
        }
    }
    Ok(entries)
}

fn is_request_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    !name.starts_with('.')
        && path.extension().and_then(|v| v.to_str()) == Some("json")
        && path
            .file_stem()
            .and_then(|v| v.to_str())
            .is_some_and(|stem| !stem.trim().is_empty())
}

fn json_files_oldest_first(dir: &Path) -> Result<Vec<PathBuf>, QueueError> {
    let read = match fs::read_dir(dir) {
        Ok(read) => read,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(io_err(dir, err)),
    };
    let mut files = Vec::new();
    for entry in read {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        if !path.is_file() || !is_request_file(&path) {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|meta| meta.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        files.push((modified, path));
    }
    files.sort_by(|(a_time, a_path), (b_time, b_path)| {
        a_time
            .cmp(b_time)
            .then_with(|| a_path.file_name().cmp(&b_path.file_name()))
    });
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

fn io_err(path: &Path, source: std::io::Error) -> QueueError {
    QueueError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn parse_err(path: &Path, source: serde_json::Error) -> QueueError {
    QueueError::Parse {
        path: path.display().to_string(),
        source,
    }
}
