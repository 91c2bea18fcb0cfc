pub mod error;
pub mod load;
pub mod paths;
pub mod save;
pub mod settings;
pub use error::ConfigError;
pub use load::{
    apply_env_overrides, load_settings, DATA_ROOT_ENV, DOCKER_HOST_ENV, ENVIRONMENT_ENV,
    HOST_LOCKER_PATH_ENV,
};
pub use paths::{default_settings_path, DEFAULT_SETTINGS_FILE_NAME, SETTINGS_PATH_ENV};
pub use save::save_settings;
pub use settings::{ContainerSettings, PermissionSettings, SchedulerSettings, Settings};
