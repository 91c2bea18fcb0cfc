pub mod file_meta;
pub mod job_meta;
pub use file_meta::{resolve_file_meta, safe_username, FileMeta};
pub use job_meta::{
    resolve_job_meta, DeclaredJobMeta, JobMeta, JobSource, Scope, ENV_PAGE_ID, ENV_RECIPE_NAME,
    ENV_SCOPE, ENV_STEP_ID, ENV_USERNAME, ENV_USER_ID, ENV_UUID, IDENTITY_ENV_KEYS,
    SHARED_IDENTITY,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("job identity is missing `{0}`")]
    MissingField(&'static str),
    #[error("job scope `{0}` is not one of individual, shared")]
    InvalidScope(String),
    #[error("locker root is not configured")]
    EmptyLockerRoot,
}
