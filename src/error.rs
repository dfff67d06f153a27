//! Engine error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the prediction engine.
///
/// Only `Configuration` and `InvalidOutcome` are returned synchronously to
/// callers at the boundary; the remaining variants are contained inside the
/// cycle and degrade the decision instead of aborting it.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Invalid estimator registration or malformed config values
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A single estimator's predict call raised or timed out
    #[error("estimator '{id}' failed: {reason}")]
    EstimatorFailure { id: String, reason: String },

    /// All estimators failed, or the window is shorter than the minimum
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// Grading the same (estimator, round) or the same decision twice
    #[error("duplicate grading for '{scope}' in round '{round_id}'")]
    DuplicateGrading { scope: String, round_id: String },

    /// A submitted outcome value is non-positive or otherwise malformed
    #[error("invalid outcome: {0}")]
    InvalidOutcome(String),
}

impl EngineError {
    /// True for errors that are contained within a cycle and never abort it.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::EstimatorFailure { .. } | EngineError::InsufficientData(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::EstimatorFailure {
            id: "quantile".to_string(),
            reason: "timed out".to_string(),
        };
        assert_eq!(err.to_string(), "estimator 'quantile' failed: timed out");

        let err = EngineError::DuplicateGrading {
            scope: "momentum".to_string(),
            round_id: "r-42".to_string(),
        };
        assert!(err.to_string().contains("r-42"));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(EngineError::InsufficientData("empty".into()).is_recoverable());
        assert!(EngineError::EstimatorFailure {
            id: "x".into(),
            reason: "y".into()
        }
        .is_recoverable());
        assert!(!EngineError::InvalidOutcome("0.0".into()).is_recoverable());
        assert!(!EngineError::Configuration("bad".into()).is_recoverable());
    }
}
