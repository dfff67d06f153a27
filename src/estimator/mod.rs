//! Estimator capability interface
//!
//! Concrete estimators (tree ensembles, boosted models, rule-derived
//! pseudo-estimators) all sit behind the single [`Estimator`] trait and are
//! registered at startup by the model-loading collaborator. The engine treats
//! them opaquely: it only ever calls `fit` and `predict`.

pub mod builtin;

pub use builtin::{MomentumEstimator, MovingAverageEstimator, QuantileEstimator};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

/// One estimator's prediction for the next round
#[derive(Debug, Clone, Serialize)]
pub struct EstimatorPrediction {
    pub estimator_id: String,
    /// Predicted next-round multiplier
    pub value: f64,
    /// Estimator's own confidence (0-1)
    pub confidence: f64,
    /// Optional predicted (low, high) range
    pub range: Option<(f64, f64)>,
}

/// Opaque prediction capability
///
/// `predict` must be a pure function of the window it is given; stateful
/// models keep their fitted parameters behind interior mutability and update
/// them only in `fit`.
#[async_trait]
pub trait Estimator: Send + Sync {
    /// Stable identifier used for registration, grading and weighting
    fn id(&self) -> &str;

    /// Re-train on the full retained history. Optional; stateless
    /// estimators ignore it.
    async fn fit(&self, _history: &[f64]) -> Result<()> {
        Ok(())
    }

    /// Predict the next-round multiplier from the trailing window
    async fn predict(&self, window: &[f64]) -> Result<EstimatorPrediction>;
}
