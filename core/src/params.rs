use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::calibration::ParameterRanges;

/// Concrete generation parameters for one request. Either supplied verbatim
/// by the caller or derived as the midpoint of the active calibration's
/// ranges. Serialized with the provider's camelCase key names.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveParameters {
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub frequency_penalty: f64,
    /// Not calibrated; defaults to 0 when the caller omits it.
    #[serde(default)]
    pub presence_penalty: f64,
}

impl EffectiveParameters {
    /// Midpoint of each stored range. Token counts are floored to whole
    /// tokens; presence penalty has no range and starts at 0.
    pub fn from_ranges(ranges: &ParameterRanges) -> Self {
        Self {
            temperature: ranges.temperature.midpoint(),
            top_p: ranges.top_p.midpoint(),
            max_tokens: ranges.max_tokens.midpoint().floor() as u32,
            frequency_penalty: ranges.frequency_penalty.midpoint(),
            presence_penalty: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Range;

    #[test]
    fn midpoints_of_calibrated_ranges() {
        let ranges = ParameterRanges {
            temperature: Range::new(0.4, 0.8),
            top_p: Range::new(0.7, 0.9),
            max_tokens: Range::new(500.0, 1500.0),
            frequency_penalty: Range::new(0.0, 0.3),
        };

        let params = EffectiveParameters::from_ranges(&ranges);
        assert!((params.temperature - 0.6).abs() < 1e-9);
        assert!((params.top_p - 0.8).abs() < 1e-9);
        assert_eq!(params.max_tokens, 1000);
        assert!((params.frequency_penalty - 0.15).abs() < 1e-9);
        assert_eq!(params.presence_penalty, 0.0);
    }

    #[test]
    fn odd_token_midpoint_floors() {
        let ranges = ParameterRanges {
            temperature: Range::new(0.3, 0.7),
            top_p: Range::new(0.6, 0.85),
            max_tokens: Range::new(300.0, 1001.0),
            frequency_penalty: Range::new(0.0, 0.3),
        };
        assert_eq!(EffectiveParameters::from_ranges(&ranges).max_tokens, 650);
    }

    #[test]
    fn presence_penalty_defaults_when_omitted() {
        let params: EffectiveParameters = serde_json::from_str(
            r#"{"temperature":0.5,"topP":0.8,"maxTokens":800,"frequencyPenalty":0.1}"#,
        )
        .unwrap();
        assert_eq!(params.presence_penalty, 0.0);
    }
}
