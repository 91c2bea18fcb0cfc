use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Host-visible locker root handed to the container runtime when the
    /// daemon itself runs inside a container.
    #[serde(default)]
    pub host_locker_path: Option<PathBuf>,
    #[serde(default)]
    pub container: ContainerSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub permissions: PermissionSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            environment: default_environment(),
            host_locker_path: None,
            container: ContainerSettings::default(),
            scheduler: SchedulerSettings::default(),
            permissions: PermissionSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ContainerSettings {
    #[serde(default = "default_container_binary")]
    pub binary: String,
    #[serde(default)]
    pub docker_host: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
    #[serde(default = "default_registry")]
    pub default_registry: String,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            binary: default_container_binary(),
            docker_host: None,
            default_timeout_secs: default_timeout_secs(),
            stop_grace_secs: default_stop_grace_secs(),
            default_registry: default_registry(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SchedulerSettings {
    #[serde(default = "default_worker_limit")]
    pub worker_limit: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
    #[serde(default = "default_recurring_retry_cap")]
    pub recurring_retry_cap: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            worker_limit: default_worker_limit(),
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            recurring_retry_cap: default_recurring_retry_cap(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PermissionSettings {
    /// Defaults to `<data_root>/<environment>/permissions.sqlite3`.
    #[serde(default)]
    pub database: Option<PathBuf>,
}

fn default_data_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_container_binary() -> String {
    "docker".to_string()
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_stop_grace_secs() -> u64 {
    10
}

fn default_registry() -> String {
    "docker.io".to_string()
}

fn default_worker_limit() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_secs() -> u64 {
    5
}

fn default_backoff_max_secs() -> u64 {
    300
}

fn default_recurring_retry_cap() -> u32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_root.as_os_str().is_empty() {
            return Err(ConfigError::Settings(
                "`data_root` must be non-empty".to_string(),
            ));
        }
        if self.environment.is_empty()
            || !self
                .environment
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
        {
            return Err(ConfigError::Settings(format!(
                "`environment` `{}` must be a non-empty name of [A-Za-z0-9_-]",
                self.environment
            )));
        }
        if let Some(host) = &self.host_locker_path {
            if !host.is_absolute() {
                return Err(ConfigError::Settings(
                    "`host_locker_path` must be an absolute path".to_string(),
                ));
            }
        }

        if self.container.binary.trim().is_empty() {
            return Err(ConfigError::Settings(
                "`container.binary` must be non-empty".to_string(),
            ));
        }
        if self.container.default_timeout_secs == 0 {
            return Err(ConfigError::Settings(
                "`container.default_timeout_secs` must be greater than zero".to_string(),
            ));
        }
        if self.container.default_registry.trim().is_empty()
            || self.container.default_registry.contains('/')
        {
            return Err(ConfigError::Settings(
                "`container.default_registry` must be a bare registry host".to_string(),
            ));
        }

        let scheduler = &self.scheduler;
        if scheduler.worker_limit == 0 {
            return Err(ConfigError::Settings(
                "`scheduler.worker_limit` must be at least 1".to_string(),
            ));
        }
        if scheduler.max_attempts == 0 {
            return Err(ConfigError::Settings(
                "`scheduler.max_attempts` must be at least 1".to_string(),
            ));
        }
        if scheduler.backoff_base_secs == 0 {
            return Err(ConfigError::Settings(
                "`scheduler.backoff_base_secs` must be greater than zero".to_string(),
            ));
        }
        if scheduler.backoff_max_secs < scheduler.backoff_base_secs {
            return Err(ConfigError::Settings(
                "`scheduler.backoff_max_secs` must be >= `scheduler.backoff_base_secs`"
                    .to_string(),
            ));
        }
        if scheduler.poll_interval_ms == 0 {
            return Err(ConfigError::Settings(
                "`scheduler.poll_interval_ms` must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn env_root(&self) -> PathBuf {
        self.data_root.join(&self.environment)
    }

    pub fn permissions_database(&self) -> PathBuf {
        self.permissions
            .database
            .clone()
            .unwrap_or_else(|| self.env_root().join("permissions.sqlite3"))
    }
}
