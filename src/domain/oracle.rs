//! AI match predictions ("Oracle").

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::FieldError;

/// How the question is asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OracleMode {
    /// Free-text question.
    Text,
    /// Photo of a fixture list or bet slip.
    Image,
}

/// Optional narrowing of the prediction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OracleFilters {
    /// Competition name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub league: Option<String>,
    /// Market, e.g. `1x2` or `btts`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market: Option<String>,
    /// Risk appetite, e.g. `low` or `high`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<String>,
}

/// A prediction request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OracleRequest {
    /// Request mode.
    pub mode: OracleMode,
    /// Question text; required in text mode.
    #[serde(default)]
    pub query: Option<String>,
    /// Base64 image; required in image mode.
    #[serde(default)]
    pub image: Option<String>,
    /// Optional filters.
    #[serde(default)]
    pub filters: OracleFilters,
}

impl OracleRequest {
    /// Checks that the input the mode needs is present.
    ///
    /// # Errors
    ///
    /// Returns the offending field.
    pub fn validate(&self) -> Result<(), FieldError> {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        match self.mode {
            OracleMode::Text if !present(&self.query) => {
                Err(FieldError::new(0, "query", "a question is required in text mode"))
            }
            OracleMode::Image if !present(&self.image) => {
                Err(FieldError::new(0, "image", "an image is required in image mode"))
            }
            _ => Ok(()),
        }
    }
}

/// One predicted fixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MatchPrediction {
    /// Fixture, e.g. `Chiefs vs Pirates`.
    #[serde(rename = "match", alias = "fixture")]
    pub fixture: String,
    /// Predicted outcome.
    pub prediction: String,
    /// Confidence percentage.
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Suggested odds.
    #[serde(default)]
    pub odds: Option<f64>,
    /// Short rationale.
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// The function's answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OraclePrediction {
    /// Predicted fixtures.
    #[serde(default)]
    pub predictions: Vec<MatchPrediction>,
    /// Free-text advice.
    #[serde(default)]
    pub advice: String,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn mode_decides_required_input() {
        let text = OracleRequest {
            mode: OracleMode::Text,
            query: Some("  ".to_string()),
            image: Some("aGk=".to_string()),
            filters: OracleFilters::default(),
        };
        assert_eq!(text.validate().map_err(|e| e.field), Err("query".to_string()));

        let image = OracleRequest {
            mode: OracleMode::Image,
            query: None,
            image: Some("aGk=".to_string()),
            filters: OracleFilters::default(),
        };
        assert!(image.validate().is_ok());
    }

    #[test]
    fn prediction_accepts_match_key() {
        let raw = serde_json::json!({
            "predictions": [{ "match": "Chiefs vs Pirates", "prediction": "Home win", "confidence": 64 }],
            "advice": "Keep stakes small",
        });
        let Ok(parsed) = serde_json::from_value::<OraclePrediction>(raw) else {
            panic!("decode failed");
        };
        let Some(first) = parsed.predictions.first() else {
            panic!("expected one prediction");
        };
        assert_eq!(first.fixture, "Chiefs vs Pirates");
        assert_eq!(first.confidence, Some(64.0));
    }
}
