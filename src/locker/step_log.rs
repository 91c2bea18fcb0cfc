use super::LockerError;
use crate::identity::FileMeta;
use crate::shared::slug::slug;
use crate::shared::time::human_timestamp;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTags {
    pub image_hash: String,
    pub image_name: String,
    pub step: String,
}

/// Append-only per page/recipe log, one tagged line per event.
#[derive(Debug)]
pub struct StepLog {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    event_id: i64,
    tags: LogTags,
}

pub fn step_log_path(file_meta: &FileMeta, recipe_name: &str) -> PathBuf {
    file_meta.logs_dir().join(format!(
        "{}-{}.log",
        slug(&file_meta.page_string),
        slug(recipe_name)
    ))
}

impl StepLog {
    /// `now` doubles as the event id shared by every line of this run.
    pub fn open(
        file_meta: &FileMeta,
        recipe_name: &str,
        tags: LogTags,
        now: i64,
    ) -> Result<Self, LockerError> {
        let path = step_log_path(file_meta, recipe_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| LockerError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| LockerError::OpenFile {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            event_id: now,
            tags,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn event_id(&self) -> i64 {
        self.event_id
    }

    pub fn format_line(&self, message: &str, now: i64) -> String {
        format!(
            "[{}] [image:{}] [name:{}] [event:{}] [step:{}] {}",
            human_timestamp(now),
            self.tags.image_hash,
            self.tags.image_name,
            self.event_id,
            self.tags.step,
            message
        )
    }

    pub fn write(&mut self, message: &str, now: i64) -> Result<(), LockerError> {
        let line = self.format_line(message, now);
        let Some(writer) = self.writer.as_mut() else {
            return Err(LockerError::LogClosed {
                path: self.path.display().to_string(),
            });
        };
        writeln!(writer, "{line}").map_err(|source| LockerError::WriteFile {
            path: self.path.display().to_string(),
            source,
        })
    }

    /// Flushes and releases the file. A flush failure is returned but the
    /// handle is released either way; closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), LockerError> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        writer.flush().map_err(|source| LockerError::Flush {
            path: self.path.display().to_string(),
            source,
        })
    }
}

impl Drop for StepLog {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
