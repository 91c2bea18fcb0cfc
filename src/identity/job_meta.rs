use super::IdentityError;
use crate::queue::JobRequest;
use crate::shared::slug::{slug, username_slug};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const ENV_UUID: &str = "LEMC_UUID";
pub const ENV_PAGE_ID: &str = "LEMC_PAGE_ID";
pub const ENV_USER_ID: &str = "LEMC_USER_ID";
pub const ENV_USERNAME: &str = "LEMC_USERNAME";
pub const ENV_RECIPE_NAME: &str = "LEMC_RECIPE_NAME";
pub const ENV_STEP_ID: &str = "LEMC_STEP_ID";
pub const ENV_SCOPE: &str = "LEMC_SCOPE";

pub const IDENTITY_ENV_KEYS: [&str; 7] = [
    ENV_UUID,
    ENV_PAGE_ID,
    ENV_USER_ID,
    ENV_USERNAME,
    ENV_RECIPE_NAME,
    ENV_STEP_ID,
    ENV_SCOPE,
];

pub const SHARED_IDENTITY: &str = "shared-user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    #[default]
    Individual,
    Shared,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::Shared => "shared",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "individual" => Some(Self::Individual),
            "shared" => Some(Self::Shared),
            _ => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a single step execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobMeta {
    pub uuid: String,
    pub page_id: String,
    pub step_id: String,
    pub user_id: String,
    pub username: String,
    pub recipe_name: String,
    pub scope: Scope,
}

impl JobMeta {
    /// Deterministic container name, also used as the per-job concurrency key.
    pub fn container_name(&self) -> String {
        let identity = match self.scope {
            Scope::Individual => username_slug(&self.username),
            Scope::Shared => SHARED_IDENTITY.to_string(),
        };
        format!(
            "uuid-{}-page-{}-recipe-{}-step-{}-scope-{}-username-{}",
            self.uuid,
            self.page_id,
            slug(&self.recipe_name),
            self.step_id,
            self.scope,
            identity
        )
    }

    /// `LEMC_*` variables describing this job, in a stable order.
    pub fn to_env(&self) -> Vec<(&'static str, String)> {
        vec![
            (ENV_UUID, self.uuid.clone()),
            (ENV_PAGE_ID, self.page_id.clone()),
            (ENV_USER_ID, self.user_id.clone()),
            (ENV_USERNAME, self.username.clone()),
            (ENV_RECIPE_NAME, self.recipe_name.clone()),
            (ENV_STEP_ID, self.step_id.clone()),
            (ENV_SCOPE, self.scope.as_str().to_string()),
        ]
    }
}

/// Identity as a running container reports it. `None` means the variable was
/// absent, which is distinct from a value that is present but empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclaredJobMeta {
    pub uuid: Option<String>,
    pub page_id: Option<String>,
    pub step_id: Option<String>,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub recipe_name: Option<String>,
    pub scope: Option<String>,
}

impl DeclaredJobMeta {
    pub fn from_env<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut declared = Self::default();
        for (key, value) in vars {
            let slot = match key.as_ref() {
                ENV_UUID => &mut declared.uuid,
                ENV_PAGE_ID => &mut declared.page_id,
                ENV_USER_ID => &mut declared.user_id,
                ENV_USERNAME => &mut declared.username,
                ENV_RECIPE_NAME => &mut declared.recipe_name,
                ENV_STEP_ID => &mut declared.step_id,
                ENV_SCOPE => &mut declared.scope,
                _ => continue,
            };
            *slot = Some(value.into());
        }
        declared
    }

    pub fn into_job_meta(self) -> Result<JobMeta, IdentityError> {
        let scope_raw = required(self.scope, ENV_SCOPE)?;
        let scope = Scope::parse(&scope_raw).ok_or(IdentityError::InvalidScope(scope_raw))?;
        Ok(JobMeta {
            uuid: required(self.uuid, ENV_UUID)?,
            page_id: required(self.page_id, ENV_PAGE_ID)?,
            step_id: required(self.step_id, ENV_STEP_ID)?,
            user_id: required(self.user_id, ENV_USER_ID)?,
            username: required(self.username, ENV_USERNAME)?,
            recipe_name: required(self.recipe_name, ENV_RECIPE_NAME)?,
            scope,
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, IdentityError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(IdentityError::MissingField(field)),
    }
}

pub enum JobSource<'a> {
    Trigger(&'a JobRequest),
    Environment(DeclaredJobMeta),
}

pub fn resolve_job_meta(source: JobSource<'_>) -> Result<JobMeta, IdentityError> {
    match source {
        JobSource::Trigger(request) => Ok(JobMeta {
            uuid: non_empty(&request.uuid, ENV_UUID)?,
            page_id: non_empty(&request.page_id, ENV_PAGE_ID)?,
            step_id: request.step.step.to_string(),
            user_id: non_empty(&request.user_id, ENV_USER_ID)?,
            username: non_empty(&request.username, ENV_USERNAME)?,
            recipe_name: non_empty(&request.recipe_name, ENV_RECIPE_NAME)?,
            scope: request.scope,
        }),
        JobSource::Environment(declared) => declared.into_job_meta(),
    }
}

fn non_empty(value: &str, field: &'static str) -> Result<String, IdentityError> {
    if value.trim().is_empty() {
        return Err(IdentityError::MissingField(field));
    }
    Ok(value.to_string())
}
