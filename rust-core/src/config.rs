//! Bundled engine configuration.
//!
//! Every component keeps its own config struct with documented defaults;
//! `EngineConfig` only groups them so a host can load one JSON document.
//! Fields missing from the document keep their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AnalysisError, Result};
use crate::hfvp::HfvpOptions;
use crate::scoring::ScoringConfig;
use crate::step_detection::GaitDetectorConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub gait: GaitDetectorConfig,
    pub hfvp: HfvpOptions,
    /// Scoring multipliers and the quality bands used to grade inputs.
    pub scoring: ScoringConfig,
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| AnalysisError::json("parsing engine config", e))?;
        config.validate()?;
        debug!(
            min_confidence = config.gait.min_confidence,
            method = ?config.hfvp.method,
            "engine config loaded"
        );
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AnalysisError::io("reading engine config", e))?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| AnalysisError::json("serializing engine config", e))
    }

    /// Reject settings no component can run with.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.gait.min_confidence) {
            return Err(AnalysisError::invalid_input(format!(
                "gait min_confidence must be in [0, 1], got {}",
                self.gait.min_confidence
            )));
        }
        if !(self.hfvp.gravity > 0.0) {
            return Err(AnalysisError::invalid_input("gravity must be positive"));
        }
        if !(self.hfvp.outlier_sigma > 0.0) {
            return Err(AnalysisError::invalid_input("outlier_sigma must be positive"));
        }
        let s = &self.scoring;
        for (name, m) in [
            ("good_multiplier", s.good_multiplier),
            ("acceptable_multiplier", s.acceptable_multiplier),
            ("reference_only_multiplier", s.reference_only_multiplier),
        ] {
            if !(0.0..=1.0).contains(&m) {
                return Err(AnalysisError::invalid_input(format!("{name} must be in [0, 1], got {m}")));
            }
        }
        if !(s.near_threshold_band >= 0.0) {
            return Err(AnalysisError::invalid_input("near_threshold_band must be non-negative"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hfvp::RegressionMethod;

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{"gait": {"min_confidence": 0.4}, "hfvp": {"method": "least_squares"}}"#,
        )
        .unwrap();
        assert_eq!(config.gait.min_confidence, 0.4);
        assert_eq!(config.gait.fusion_radius, 2);
        assert_eq!(config.hfvp.method, RegressionMethod::LeastSquares);
        assert_eq!(config.scoring, ScoringConfig::default());
    }

    #[test]
    fn test_round_trip() {
        let config = EngineConfig::default();
        let json = config.to_json_string().unwrap();
        assert_eq!(EngineConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(EngineConfig::from_json_str(r#"{"scoring": {"acceptable_multiplier": 1.5}}"#).is_err());
        assert!(EngineConfig::from_json_str(r#"{"gait": {"min_confidence": -0.1}}"#).is_err());
        assert!(matches!(
            EngineConfig::from_json_str("not json"),
            Err(AnalysisError::Json { .. })
        ));
    }
}
