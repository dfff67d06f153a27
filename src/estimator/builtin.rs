//! Built-in statistical estimators
//!
//! Lightweight pseudo-estimators derived from window statistics. They serve
//! as always-available ensemble members alongside externally trained models
//! and as the default pool for the simulation binary.

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{Estimator, EstimatorPrediction};
use crate::error::{EngineError, Result};

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Predicts the mean of the trailing `period` outcomes.
///
/// Confidence falls as the slice's coefficient of variation rises.
pub struct MovingAverageEstimator {
    id: String,
    period: usize,
}

impl MovingAverageEstimator {
    pub fn new(id: impl Into<String>, period: usize) -> Self {
        Self {
            id: id.into(),
            period: period.max(2),
        }
    }
}

#[async_trait]
impl Estimator for MovingAverageEstimator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn predict(&self, window: &[f64]) -> Result<EstimatorPrediction> {
        if window.len() < 2 {
            return Err(EngineError::EstimatorFailure {
                id: self.id.clone(),
                reason: format!("window of {} is too short", window.len()),
            });
        }
        let slice = &window[window.len().saturating_sub(self.period)..];
        let avg = mean(slice);
        let std = std_dev(slice);
        let cv = if avg > 0.0 { std / avg } else { 1.0 };
        Ok(EstimatorPrediction {
            estimator_id: self.id.clone(),
            value: avg.max(1.0),
            confidence: (1.0 / (1.0 + cv)).clamp(0.0, 1.0),
            range: Some(((avg - std).max(1.0), avg + std)),
        })
    }
}

/// Extrapolates the recent linear drift one round forward.
pub struct MomentumEstimator {
    id: String,
    lookback: usize,
}

impl MomentumEstimator {
    pub fn new(id: impl Into<String>, lookback: usize) -> Self {
        Self {
            id: id.into(),
            lookback: lookback.max(3),
        }
    }
}

#[async_trait]
impl Estimator for MomentumEstimator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn predict(&self, window: &[f64]) -> Result<EstimatorPrediction> {
        if window.len() < 3 {
            return Err(EngineError::EstimatorFailure {
                id: self.id.clone(),
                reason: format!("window of {} is too short", window.len()),
            });
        }
        let slice = &window[window.len().saturating_sub(self.lookback)..];
        let steps: Vec<f64> = slice.windows(2).map(|w| w[1] - w[0]).collect();
        let drift = mean(&steps);
        let last = slice[slice.len() - 1];
        let value = (last + drift).max(1.0);

        // Confidence from directional consistency of the steps
        let signs = steps.iter().filter(|s| s.signum() == drift.signum()).count();
        let consistency = signs as f64 / steps.len() as f64;
        Ok(EstimatorPrediction {
            estimator_id: self.id.clone(),
            value,
            confidence: (consistency * 0.8).clamp(0.1, 0.8),
            range: None,
        })
    }
}

/// Predicts a fitted quantile of the full history.
///
/// `fit` stores the quantile of everything seen so far; `predict` falls back
/// to the quantile of the live window until the first fit.
pub struct QuantileEstimator {
    id: String,
    quantile: f64,
    fitted: RwLock<Option<f64>>,
}

impl QuantileEstimator {
    pub fn new(id: impl Into<String>, quantile: f64) -> Self {
        Self {
            id: id.into(),
            quantile: quantile.clamp(0.0, 1.0),
            fitted: RwLock::new(None),
        }
    }

    fn quantile_of(&self, values: &[f64]) -> f64 {
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let idx = ((sorted.len() - 1) as f64 * self.quantile).round() as usize;
        sorted[idx]
    }
}

#[async_trait]
impl Estimator for QuantileEstimator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fit(&self, history: &[f64]) -> Result<()> {
        if history.is_empty() {
            return Err(EngineError::EstimatorFailure {
                id: self.id.clone(),
                reason: "cannot fit on empty history".into(),
            });
        }
        *self.fitted.write() = Some(self.quantile_of(history));
        Ok(())
    }

    async fn predict(&self, window: &[f64]) -> Result<EstimatorPrediction> {
        if window.is_empty() {
            return Err(EngineError::EstimatorFailure {
                id: self.id.clone(),
                reason: "empty window".into(),
            });
        }
        let fitted = *self.fitted.read();
        let value = fitted.unwrap_or_else(|| self.quantile_of(window)).max(1.0);
        Ok(EstimatorPrediction {
            estimator_id: self.id.clone(),
            value,
            confidence: 0.5,
            range: None,
        })
    }
}
