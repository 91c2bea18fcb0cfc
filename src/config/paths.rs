use std::path::PathBuf;

pub const DEFAULT_SETTINGS_FILE_NAME: &str = "lemc.yaml";
pub const SETTINGS_PATH_ENV: &str = "LEMC_CONFIG";

/// `$LEMC_CONFIG` when set, otherwise `lemc.yaml` in the working directory.
pub fn default_settings_path() -> PathBuf {
    match std::env::var_os(SETTINGS_PATH_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_SETTINGS_FILE_NAME),
    }
}
