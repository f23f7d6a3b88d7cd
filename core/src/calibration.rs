use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// How thorough the calibration quiz was. Quick is a short pass, deep asks
/// the full question set. The derivation algorithm is identical for both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationMode {
    Quick,
    Deep,
}

impl CalibrationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalibrationMode::Quick => "quick",
            CalibrationMode::Deep => "deep",
        }
    }
}

/// One answered calibration question. Answers are either free text or a
/// multiple-choice selection; both feed the parameter deriver.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationAnswer {
    pub question_id: String,
    pub answer: AnswerValue,
    /// Reserved for weighted scoring; currently carried but not applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

/// Free-text or multiple-choice answer value.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum AnswerValue {
    Text(String),
    Choices(Vec<String>),
}

/// An inclusive numeric range. Invariant: `min <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    pub fn is_ordered(&self) -> bool {
        self.min <= self.max
    }
}

/// The four parameter ranges a calibration produces. Effective parameters for
/// a generation request are taken from these (see `EffectiveParameters`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParameterRanges {
    pub temperature: Range,
    pub top_p: Range,
    pub max_tokens: Range,
    pub frequency_penalty: Range,
}

#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("range '{name}' has min {min} greater than max {max}")]
    InvalidRange {
        name: &'static str,
        min: f64,
        max: f64,
    },
}

impl ParameterRanges {
    /// Check the `min <= max` invariant on every range.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        let named = [
            ("temperature", &self.temperature),
            ("top_p", &self.top_p),
            ("max_tokens", &self.max_tokens),
            ("frequency_penalty", &self.frequency_penalty),
        ];
        for (name, range) in named {
            if !range.is_ordered() {
                return Err(CalibrationError::InvalidRange {
                    name,
                    min: range.min,
                    max: range.max,
                });
            }
        }
        Ok(())
    }
}

/// A stored calibration. Immutable once created: the generation pipeline
/// only reads these; the calibration flow inserts them and may delete them.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Calibration {
    pub id: Uuid,
    pub user_id: Uuid,
    pub mode: CalibrationMode,
    pub answers: Vec<CalibrationAnswer>,
    pub ranges: ParameterRanges,
    pub insights: Vec<String>,
    pub created_at: DateTime<Utc>,
}
