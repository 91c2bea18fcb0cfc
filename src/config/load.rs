use super::{default_settings_path, ConfigError, Settings};
use std::path::{Path, PathBuf};

pub const DATA_ROOT_ENV: &str = "LEMC_DATA";
pub const ENVIRONMENT_ENV: &str = "LEMC_ENV";
pub const HOST_LOCKER_PATH_ENV: &str = "LEMC_HOST_LOCKER_PATH";
pub const DOCKER_HOST_ENV: &str = "LEMC_DOCKER_HOST";

/// Loads settings from `path`, or from the default location when it exists,
/// then applies `LEMC_*` overrides from the process environment.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let mut settings = match path {
        Some(path) => Settings::from_path(path)?,
        None => {
            let default_path = default_settings_path();
            if default_path.is_file() {
                Settings::from_path(&default_path)?
            } else {
                Settings::default()
            }
        }
    };
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok())?;
    settings.validate()?;
    Ok(settings)
}

pub fn apply_env_overrides<F>(settings: &mut Settings, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(root) = lookup(DATA_ROOT_ENV) {
        settings.data_root = PathBuf::from(root);
    }
    if let Some(environment) = lookup(ENVIRONMENT_ENV) {
        settings.environment = environment.trim().to_string();
    }
    if let Some(host) = lookup(HOST_LOCKER_PATH_ENV) {
        let host = PathBuf::from(host);
        if !host.is_absolute() {
            return Err(ConfigError::Override {
                key: HOST_LOCKER_PATH_ENV,
                message: format!("`{}` is not an absolute path", host.display()),
            });
        }
        settings.host_locker_path = Some(host);
    }
    if let Some(docker_host) = lookup(DOCKER_HOST_ENV) {
        settings.container.docker_host = Some(docker_host);
    }
    Ok(())
}
