use super::{DoSpec, RecipeError, StepSpec};
use crate::identity::Scope;
use crate::queue::{JobRequest, Schedule};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(rename = "recipe")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub steps: Vec<StepSpec>,
}

impl Recipe {
    pub fn validate(&self) -> Result<(), RecipeError> {
        if self.name.trim().is_empty() {
            return Err(RecipeError::Invalid("recipe name must be non-empty".to_string()));
        }
        if self.steps.is_empty() {
            return Err(RecipeError::Invalid(format!(
                "recipe `{}` has no steps",
                self.name
            )));
        }
        let mut seen = BTreeSet::new();
        for step in &self.steps {
            if !seen.insert(step.step) {
                return Err(RecipeError::Invalid(format!(
                    "recipe `{}` declares step {} more than once",
                    self.name, step.step
                )));
            }
            if step.image.trim().is_empty() {
                return Err(RecipeError::Invalid(format!(
                    "recipe `{}` step {} has no image",
                    self.name, step.step
                )));
            }
            step.env_pairs()?;
        }
        Ok(())
    }
}

/// A request to run a recipe for one user on one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeTrigger {
    #[serde(deserialize_with = "id_string")]
    pub uuid: String,
    #[serde(deserialize_with = "id_string")]
    pub page_id: String,
    #[serde(deserialize_with = "id_string")]
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default, deserialize_with = "optional_id_string")]
    pub cookbook_id: Option<String>,
    #[serde(default, deserialize_with = "optional_id_string")]
    pub app_id: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub recipe: Recipe,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for String {
    fn from(value: RawId) -> Self {
        match value {
            RawId::Text(text) => text,
            RawId::Number(number) => number.to_string(),
        }
    }
}

fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    RawId::deserialize(deserializer).map(String::from)
}

fn optional_id_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Option::<RawId>::deserialize(deserializer).map(|raw| raw.map(String::from))
}

/// Turns a trigger into queue work. `now` steps form one chain carried by the
/// first of them; `in`/`every` steps become independent entries.
pub fn plan_recipe(
    trigger: &RecipeTrigger,
    now: i64,
) -> Result<Vec<(JobRequest, Schedule)>, RecipeError> {
    trigger.recipe.validate()?;

    let request_for = |step: &StepSpec, continuation: Vec<StepSpec>| JobRequest {
        uuid: trigger.uuid.clone(),
        page_id: trigger.page_id.clone(),
        user_id: trigger.user_id.clone(),
        username: trigger.username.clone(),
        recipe_name: trigger.recipe.name.clone(),
        scope: trigger.scope,
        cookbook_id: trigger.cookbook_id.clone(),
        app_id: trigger.app_id.clone(),
        step: step.clone(),
        env: trigger.env.clone(),
        continuation,
    };

    let mut planned = Vec::new();
    let mut now_steps = trigger
        .recipe
        .steps
        .iter()
        .filter(|step| step.do_spec == DoSpec::Now);
    if let Some(first) = now_steps.next() {
        planned.push((request_for(first, now_steps.cloned().collect()), Schedule::Now));
    }

    for step in &trigger.recipe.steps {
        let schedule = match step.do_spec {
            DoSpec::Now => continue,
            DoSpec::In(delay) => Schedule::In {
                scheduled_at: now.saturating_add(secs_i64(delay.as_secs())),
            },
            DoSpec::Every(interval) => Schedule::Every {
                interval_secs: interval.as_secs(),
                scheduled_at: now.saturating_add(secs_i64(interval.as_secs())),
            },
        };
        planned.push((request_for(step, Vec::new()), schedule));
    }
    Ok(planned)
}

fn secs_i64(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}
