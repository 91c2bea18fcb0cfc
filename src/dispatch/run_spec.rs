use super::ImageRef;
use crate::identity::{JobMeta, IDENTITY_ENV_KEYS};
use crate::locker::LockerDirs;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub const MOUNT_PUBLIC: &str = "/lemc/public";
pub const MOUNT_PRIVATE: &str = "/lemc/private";
pub const MOUNT_CACHE: &str = "/lemc/cache";
pub const MOUNT_SHARED: &str = "/lemc/shared";
pub const MOUNT_GLOBAL: &str = "/lemc/global";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: PathBuf,
    pub target: &'static str,
}

/// Everything the runtime needs to start one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub name: String,
    pub image: ImageRef,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
    pub timeout: Duration,
}

/// Element ids the page uses for this job's html/css/js fragments.
pub fn element_ids(job: &JobMeta) -> [(&'static str, String); 3] {
    let base = format!(
        "uuid-{}-pageid-{}-scope-{}",
        job.uuid, job.page_id, job.scope
    );
    [
        ("LEMC_HTML_ID", format!("{base}-html")),
        ("LEMC_CSS_ID", format!("{base}-style")),
        ("LEMC_JS_ID", format!("{base}-script")),
    ]
}

/// Layers the container environment: pass-through variables first, then the
/// fixed runtime variables, then job identity. Later layers win, so tenant
/// variables can never replace a `LEMC_*` identity value.
pub fn build_env(job: &JobMeta, pass_through: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = pass_through
        .iter()
        .filter(|(key, _)| !IDENTITY_ENV_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
    for (key, value) in element_ids(job) {
        env.insert(key.to_string(), value);
    }
    for (key, value) in job.to_env() {
        env.insert(key.to_string(), value);
    }
    env
}

pub fn build_mounts(bind: &LockerDirs) -> Vec<Mount> {
    vec![
        Mount {
            source: bind.public.clone(),
            target: MOUNT_PUBLIC,
        },
        Mount {
            source: bind.private.clone(),
            target: MOUNT_PRIVATE,
        },
        Mount {
            source: bind.cache.clone(),
            target: MOUNT_CACHE,
        },
        Mount {
            source: bind.shared.clone(),
            target: MOUNT_SHARED,
        },
        Mount {
            source: bind.global.clone(),
            target: MOUNT_GLOBAL,
        },
    ]
}

pub fn build_run_spec(
    job: &JobMeta,
    image: ImageRef,
    bind: &LockerDirs,
    pass_through: &BTreeMap<String, String>,
    timeout: Duration,
) -> RunSpec {
    RunSpec {
        name: job.container_name(),
        image,
        env: build_env(job, pass_through),
        mounts: build_mounts(bind),
        timeout,
    }
}
