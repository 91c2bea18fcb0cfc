use crate::config::{default_settings_path, load_settings, Settings};
use crate::queue::QueueStore;
use crate::runtime::LemcPaths;
use std::path::{Path, PathBuf};

/// Settings and derived paths for one CLI invocation.
#[derive(Debug, Clone)]
pub struct CliContext {
    pub settings_path: PathBuf,
    pub settings: Settings,
    pub paths: LemcPaths,
}

impl CliContext {
    pub fn queue_store(&self) -> QueueStore {
        QueueStore::new(self.paths.queue_paths())
    }
}

/// Strips `--config <path>` / `--config=<path>` from anywhere in `args`.
pub fn split_config_flag(args: Vec<String>) -> Result<(Option<PathBuf>, Vec<String>), String> {
    let mut config = None;
    let mut rest = Vec::with_capacity(args.len());
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            let value = iter
                .next()
                .ok_or_else(|| "`--config` requires a path".to_string())?;
            config = Some(PathBuf::from(value));
        } else if let Some(value) = arg.strip_prefix("--config=") {
            if value.is_empty() {
                return Err("`--config` requires a path".to_string());
            }
            config = Some(PathBuf::from(value));
        } else {
            rest.push(arg);
        }
    }
    Ok((config, rest))
}

pub fn load_context(config: Option<&Path>) -> Result<CliContext, String> {
    let settings = load_settings(config).map_err(|e| e.to_string())?;
    let paths = LemcPaths::from_settings(&settings);
    Ok(CliContext {
        settings_path: config.map_or_else(default_settings_path, Path::to_path_buf),
        settings,
        paths,
    })
}

pub fn parse_id(raw: &str, what: &str) -> Result<i64, String> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| format!("{what} must be an integer, got `{raw}`"))
}

pub fn render_optional<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "none".to_string(), |v| v.to_string())
}
