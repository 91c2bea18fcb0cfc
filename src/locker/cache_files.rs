use super::LockerError;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheChannel {
    Html,
    Css,
    Js,
}

impl CacheChannel {
    pub const ALL: [CacheChannel; 3] = [Self::Html, Self::Css, Self::Js];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Css => "css",
            Self::Js => "js",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "html" => Some(Self::Html),
            "css" => Some(Self::Css),
            "js" => Some(Self::Js),
            _ => None,
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            Self::Html => "cache.html",
            Self::Css => "cache.css",
            Self::Js => "cache.js",
        }
    }
}

impl fmt::Display for CacheChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Open handles to the three cache artifacts of one locker cell.
///
/// Handles are released by [`CacheFiles::close`] or on drop, whichever comes
/// first.
#[derive(Debug)]
pub struct CacheFiles {
    dir: PathBuf,
    html: Option<File>,
    css: Option<File>,
    js: Option<File>,
}

impl CacheFiles {
    pub fn open(cache_dir: &Path) -> Result<Self, LockerError> {
        Ok(Self {
            dir: cache_dir.to_path_buf(),
            html: Some(open_artifact(cache_dir, CacheChannel::Html)?),
            css: Some(open_artifact(cache_dir, CacheChannel::Css)?),
            js: Some(open_artifact(cache_dir, CacheChannel::Js)?),
        })
    }

    pub fn path(&self, channel: CacheChannel) -> PathBuf {
        self.dir.join(channel.file_name())
    }

    /// Replaces the artifact with `payload`.
    pub fn truncate(&mut self, channel: CacheChannel, payload: &str) -> Result<(), LockerError> {
        let path = self.path(channel);
        let file = self.handle(channel)?;
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.set_len(0))
            .and_then(|_| file.write_all(payload.as_bytes()))
            .map_err(|source| write_err(&path, source))
    }

    /// Appends `payload` and a newline at end of file. Only the final byte of
    /// the existing content is inspected: content left by a `trunc` without a
    /// trailing newline gets one before the new line.
    pub fn append(&mut self, channel: CacheChannel, payload: &str) -> Result<(), LockerError> {
        let path = self.path(channel);
        let file = self.handle(channel)?;
        append_line(file, payload).map_err(|source| write_err(&path, source))
    }

    pub fn is_closed(&self) -> bool {
        self.html.is_none() && self.css.is_none() && self.js.is_none()
    }

    /// Releases every handle still open. Safe to call more than once.
    pub fn close(&mut self) {
        for slot in [&mut self.html, &mut self.css, &mut self.js] {
            if let Some(file) = slot.take() {
                let _ = file.sync_data();
            }
        }
    }

    fn handle(&mut self, channel: CacheChannel) -> Result<&mut File, LockerError> {
        let slot = match channel {
            CacheChannel::Html => &mut self.html,
            CacheChannel::Css => &mut self.css,
            CacheChannel::Js => &mut self.js,
        };
        slot.as_mut().ok_or(LockerError::CacheClosed { channel })
    }
}

impl Drop for CacheFiles {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_artifact(dir: &Path, channel: CacheChannel) -> Result<File, LockerError> {
    let path = dir.join(channel.file_name());
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|source| LockerError::OpenFile {
            path: path.display().to_string(),
            source,
        })
}

fn append_line(file: &mut File, payload: &str) -> std::io::Result<()> {
    let end = file.seek(SeekFrom::End(0))?;
    if end > 0 {
        let mut last = [0_u8; 1];
        file.seek(SeekFrom::End(-1))?;
        file.read_exact(&mut last)?;
        if last[0] != b'\n' {
            file.write_all(b"\n")?;
        }
    }
    file.write_all(payload.as_bytes())?;
    file.write_all(b"\n")
}

fn write_err(path: &Path, source: std::io::Error) -> LockerError {
    LockerError::WriteFile {
        path: path.display().to_string(),
        source,
    }
}
