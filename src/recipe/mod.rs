pub mod step;
pub mod trigger;
pub use step::{DoSpec, StepDuration, StepSpec, TimeUnit};
pub use trigger::{plan_recipe, Recipe, RecipeTrigger};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecipeError {
    #[error("invalid duration `{0}`, expected <n>.<second(s)|minute(s)|hour(s)>")]
    InvalidDuration(String),
    #[error("invalid do `{0}`, expected now, in.<n>.<unit> or every.<n>.<unit>")]
    InvalidDo(String),
    #[error("step {step} has malformed environment entry `{entry}`")]
    InvalidEnv { step: u32, entry: String },
    #[error("invalid recipe: {0}")]
    Invalid(String),
}
