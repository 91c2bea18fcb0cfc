use super::{IdentityError, JobMeta, Scope, SHARED_IDENTITY};
use crate::shared::slug::{slug, username_slug};
use std::path::{Path, PathBuf};

/// Filesystem view of a [`JobMeta`] under one locker root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub job: JobMeta,
    pub safe_username: String,
    pub page_string: String,
    pub scope: Scope,
    pub identity: String,
    pub uuid: String,
    pub locker_root: PathBuf,
}

impl FileMeta {
    /// `{root}/{uuid}/{scope}/{identity}`
    pub fn identity_dir(&self) -> PathBuf {
        self.locker_root
            .join(&self.uuid)
            .join(self.scope.as_str())
            .join(&self.identity)
    }

    pub fn page_dir(&self) -> PathBuf {
        self.identity_dir().join(&self.page_string)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.identity_dir().join("logs")
    }

    pub fn tenant_shared_dir(&self) -> PathBuf {
        self.locker_root.join(&self.uuid).join("shared")
    }

    pub fn tenant_global_dir(&self) -> PathBuf {
        self.locker_root.join(&self.uuid).join("global")
    }
}

pub fn safe_username(username: &str, user_id: &str) -> String {
    format!("{}-{}", username_slug(username), slug(user_id))
}

pub fn resolve_file_meta(
    job: &JobMeta,
    is_shared: bool,
    locker_root: &Path,
) -> Result<FileMeta, IdentityError> {
    if locker_root.as_os_str().is_empty() {
        return Err(IdentityError::EmptyLockerRoot);
    }
    let safe_username = safe_username(&job.username, &job.user_id);
    let (scope, identity) = if is_shared {
        (Scope::Shared, SHARED_IDENTITY.to_string())
    } else {
        (Scope::Individual, safe_username.clone())
    };
    Ok(FileMeta {
        job: job.clone(),
        safe_username,
        page_string: format!("page-{}", job.page_id),
        scope,
        identity,
        uuid: job.uuid.clone(),
        locker_root: locker_root.to_path_buf(),
    })
}
