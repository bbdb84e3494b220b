//! Error taxonomy for the analysis engine.
//!
//! Only input invariant violations surface as `Err`. Insufficient evidence,
//! numerical degeneracies and quality-gate failures are reported through
//! validity flags, quality grades and warning lists on the results instead.

use thiserror::Error;

use crate::judgment::{AttemptAction, AttemptStatus};
use crate::rules::ScoringItem;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("{what} must be strictly increasing (violated at index {index})")]
    NonMonotonic { what: &'static str, index: usize },

    #[error("insufficient points: need at least {needed}, got {got}")]
    InsufficientPoints { needed: usize, got: usize },

    #[error("athlete mass must be a positive finite number, got {0}")]
    InvalidMass(f64),

    #[error("invalid landmark frame: {message}")]
    InvalidLandmarkFrame { message: String },

    #[error("scoring item {item} requires an aggregate that was not supplied")]
    MissingAggregate { item: ScoringItem },

    #[error("invalid rule for grade {grade}: {message}")]
    InvalidRule { grade: u8, message: String },

    #[error("no rule in effect for grade {grade}")]
    NoEffectiveRule { grade: u8 },

    #[error("illegal transition from {from:?} via {action:?}")]
    IllegalTransition {
        from: AttemptStatus,
        action: AttemptAction,
    },

    #[error("JSON error while {context}: {source}")]
    Json {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl AnalysisError {
    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_frame(message: impl Into<String>) -> Self {
        Self::InvalidLandmarkFrame {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_rule(grade: u8, message: impl Into<String>) -> Self {
        Self::InvalidRule {
            grade,
            message: message.into(),
        }
    }

    pub(crate) fn json(context: &'static str, source: serde_json::Error) -> Self {
        Self::Json { context, source }
    }

    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_are_descriptive() {
        let err = AnalysisError::NonMonotonic {
            what: "distances",
            index: 3,
        };
        assert_eq!(
            err.to_string(),
            "distances must be strictly increasing (violated at index 3)"
        );

        let err = AnalysisError::InsufficientPoints { needed: 3, got: 2 };
        assert!(err.to_string().contains("need at least 3"));

        let err = AnalysisError::MissingAggregate {
            item: ScoringItem::F0,
        };
        assert!(err.to_string().contains("f0"));
    }
}
