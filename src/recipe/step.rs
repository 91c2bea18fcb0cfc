use super::RecipeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
}

impl TimeUnit {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "second" | "seconds" => Some(Self::Second),
            "minute" | "minutes" => Some(Self::Minute),
            "hour" | "hours" => Some(Self::Hour),
            _ => None,
        }
    }

    fn secs(self) -> u64 {
        match self {
            Self::Second => 1,
            Self::Minute => 60,
            Self::Hour => 3600,
        }
    }

    fn label(self, amount: u64) -> &'static str {
        match (self, amount == 1) {
            (Self::Second, true) => "second",
            (Self::Second, false) => "seconds",
            (Self::Minute, true) => "minute",
            (Self::Minute, false) => "minutes",
            (Self::Hour, true) => "hour",
            (Self::Hour, false) => "hours",
        }
    }
}

/// `<n>.<unit>` as written in recipes, e.g. `30.seconds` or `1.hour`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StepDuration {
    pub amount: u64,
    pub unit: TimeUnit,
}

impl StepDuration {
    pub fn parse(raw: &str) -> Result<Self, RecipeError> {
        let invalid = || RecipeError::InvalidDuration(raw.to_string());
        let (amount, unit) = raw.trim().split_once('.').ok_or_else(invalid)?;
        if amount.is_empty() || !amount.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(invalid());
        }
        let amount = amount.parse::<u64>().map_err(|_| invalid())?;
        let unit = TimeUnit::parse(unit).ok_or_else(invalid)?;
        amount.checked_mul(unit.secs()).ok_or_else(invalid)?;
        Ok(Self { amount, unit })
    }

    pub fn as_secs(self) -> u64 {
        self.amount.saturating_mul(self.unit.secs())
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.as_secs())
    }
}

impl fmt::Display for StepDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.amount, self.unit.label(self.amount))
    }
}

impl TryFrom<String> for StepDuration {
    type Error = RecipeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StepDuration> for String {
    fn from(value: StepDuration) -> Self {
        value.to_string()
    }
}

/// When a step runs: `now`, `in.<n>.<unit>` or `every.<n>.<unit>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DoSpec {
    Now,
    In(StepDuration),
    Every(StepDuration),
}

impl DoSpec {
    pub fn parse(raw: &str) -> Result<Self, RecipeError> {
        let raw = raw.trim();
        if raw == "now" {
            return Ok(Self::Now);
        }
        let (class, rest) = raw
            .split_once('.')
            .ok_or_else(|| RecipeError::InvalidDo(raw.to_string()))?;
        let duration =
            StepDuration::parse(rest).map_err(|_| RecipeError::InvalidDo(raw.to_string()))?;
        match class {
            "in" => Ok(Self::In(duration)),
            "every" if duration.as_secs() > 0 => Ok(Self::Every(duration)),
            _ => Err(RecipeError::InvalidDo(raw.to_string())),
        }
    }
}

impl fmt::Display for DoSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Now => f.write_str("now"),
            Self::In(duration) => write!(f, "in.{duration}"),
            Self::Every(duration) => write!(f, "every.{duration}"),
        }
    }
}

impl TryFrom<String> for DoSpec {
    type Error = RecipeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DoSpec> for String {
    fn from(value: DoSpec) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    pub step: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub image: String,
    #[serde(rename = "do")]
    pub do_spec: DoSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<StepDuration>,
    /// `KEY=VALUE` entries.
    #[serde(default, alias = "env", skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<String>,
}

impl StepSpec {
    pub fn env_pairs(&self) -> Result<Vec<(String, String)>, RecipeError> {
        self.environment
            .iter()
            .map(|entry| {
                let (key, value) = entry.split_once('=').ok_or_else(|| RecipeError::InvalidEnv {
                    step: self.step,
                    entry: entry.clone(),
                })?;
                if key.trim().is_empty() {
                    return Err(RecipeError::InvalidEnv {
                        step: self.step,
                        entry: entry.clone(),
                    });
                }
                Ok((key.trim().to_string(), value.to_string()))
            })
            .collect()
    }
}
