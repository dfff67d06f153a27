//! Estimator ensemble
//!
//! Owns the registered estimator pool and their accuracy records. Each cycle
//! every estimator is invoked concurrently against the same read-only window
//! with a per-estimator timeout; whatever survives is aggregated into a
//! single numeric prediction with an agreement-based confidence.

pub mod accuracy;

pub use accuracy::{AccuracyTracker, EstimatorAccuracy, Trend};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EnsembleConfig;
use crate::error::{EngineError, Result};
use crate::estimator::{Estimator, EstimatorPrediction};

/// How per-estimator predictions are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    /// Weight = 1/(1+MAE), normalized across active estimators
    #[default]
    WeightedAverage,
    /// Robust to single bad estimators
    Median,
    /// Drop the top/bottom 10% of sorted predictions, then average
    TrimmedMean,
    /// Average only the k estimators with the lowest current MAE
    TopK,
}

impl AggregationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationMethod::WeightedAverage => "weighted_average",
            AggregationMethod::Median => "median",
            AggregationMethod::TrimmedMean => "trimmed_mean",
            AggregationMethod::TopK => "top_k",
        }
    }
}

/// Aggregated ensemble prediction for one cycle
#[derive(Debug, Clone, Serialize)]
pub struct EnsembleOutput {
    /// Aggregated next-round multiplier
    pub value: f64,
    /// Agreement-based confidence (0-100)
    pub confidence: f64,
    pub method: AggregationMethod,
    /// Estimators that produced a usable prediction this cycle
    pub active: usize,
    /// Estimators registered in the pool
    pub registered: usize,
    /// Coefficient of variation across active predictions
    pub dispersion: f64,
}

/// Registered estimator pool plus accuracy-driven weighting
pub struct EnsembleManager {
    estimators: Vec<Arc<dyn Estimator>>,
    tracker: AccuracyTracker,
    config: EnsembleConfig,
}

impl EnsembleManager {
    pub fn new(config: EnsembleConfig) -> Self {
        let tracker = AccuracyTracker::new(
            config.accuracy_window,
            config.baseline_weight,
            config.trend_threshold_pct,
        );
        Self {
            estimators: Vec::new(),
            tracker,
            config,
        }
    }

    /// Add an estimator to the pool. Ids must be unique and non-empty.
    pub fn register(&mut self, estimator: Arc<dyn Estimator>) -> Result<()> {
        let id = estimator.id().to_string();
        if id.is_empty() {
            return Err(EngineError::Configuration(
                "estimator id must not be empty".into(),
            ));
        }
        if self.estimators.iter().any(|e| e.id() == id) {
            return Err(EngineError::Configuration(format!(
                "estimator id '{id}' already registered"
            )));
        }
        tracing::info!(estimator = %id, "registered estimator");
        self.estimators.push(estimator);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.estimators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.estimators.is_empty()
    }

    pub fn tracker(&self) -> &AccuracyTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut AccuracyTracker {
        &mut self.tracker
    }

    /// Invoke every estimator concurrently against the window.
    ///
    /// Failures and timeouts are logged and excluded; the cycle continues in
    /// degraded mode with whatever remains.
    pub async fn predict_all(&self, window: &[f64]) -> Vec<EstimatorPrediction> {
        let timeout = Duration::from_millis(self.config.per_estimator_timeout_ms);
        let futures = self.estimators.iter().map(|est| {
            let est = est.clone();
            async move {
                let id = est.id().to_string();
                match tokio::time::timeout(timeout, est.predict(window)).await {
                    Ok(Ok(prediction)) => (id, Ok(prediction)),
                    Ok(Err(e)) => (id, Err(e.to_string())),
                    Err(_) => (id, Err("timed out".to_string())),
                }
            }
        });

        let mut predictions = Vec::with_capacity(self.estimators.len());
        for (id, result) in join_all(futures).await {
            match result {
                Ok(mut prediction) => {
                    if !prediction.value.is_finite() || prediction.value < 1.0 {
                        tracing::warn!(
                            estimator = %id,
                            value = prediction.value,
                            "estimator produced an unusable value, excluding"
                        );
                        continue;
                    }
                    // The pool id is authoritative
                    prediction.estimator_id = id;
                    prediction.confidence = prediction.confidence.clamp(0.0, 1.0);
                    predictions.push(prediction);
                }
                Err(reason) => {
                    tracing::warn!(estimator = %id, %reason, "estimator failed, excluding from cycle");
                }
            }
        }
        predictions
    }

    /// Re-fit every estimator on the retained history, tolerating failures
    pub async fn fit_all(&self, history: &[f64]) {
        let futures = self.estimators.iter().map(|est| {
            let est = est.clone();
            async move {
                let id = est.id().to_string();
                (id, est.fit(history).await)
            }
        });
        for (id, result) in join_all(futures).await {
            if let Err(e) = result {
                tracing::warn!(estimator = %id, error = %e, "estimator re-fit failed");
            }
        }
    }

    /// Combine this cycle's surviving predictions into one value
    pub fn aggregate(&self, predictions: &[EstimatorPrediction]) -> Result<EnsembleOutput> {
        if predictions.is_empty() {
            return Err(EngineError::InsufficientData(
                "no estimator produced a prediction this cycle".into(),
            ));
        }

        let method = self.config.aggregation_method;
        let value = match method {
            AggregationMethod::WeightedAverage => self.weighted_average(predictions),
            AggregationMethod::Median => Self::median(predictions),
            AggregationMethod::TrimmedMean => Self::trimmed_mean(predictions),
            AggregationMethod::TopK => self.top_k(predictions),
        };

        let (confidence, dispersion) = self.agreement_confidence(predictions);
        Ok(EnsembleOutput {
            value,
            confidence,
            method,
            active: predictions.len(),
            registered: self.estimators.len().max(predictions.len()),
            dispersion,
        })
    }

    fn weighted_average(&self, predictions: &[EstimatorPrediction]) -> f64 {
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        for p in predictions {
            let w = self.tracker.weight(&p.estimator_id);
            weighted_sum += p.value * w;
            total_weight += w;
        }
        if total_weight > 0.0 {
            weighted_sum / total_weight
        } else {
            predictions.iter().map(|p| p.value).sum::<f64>() / predictions.len() as f64
        }
    }

    fn median(predictions: &[EstimatorPrediction]) -> f64 {
        let mut values: Vec<f64> = predictions.iter().map(|p| p.value).collect();
        values.sort_by(f64::total_cmp);
        let mid = values.len() / 2;
        if values.len() % 2 == 0 {
            (values[mid - 1] + values[mid]) / 2.0
        } else {
            values[mid]
        }
    }

    fn trimmed_mean(predictions: &[EstimatorPrediction]) -> f64 {
        let mut values: Vec<f64> = predictions.iter().map(|p| p.value).collect();
        values.sort_by(f64::total_cmp);
        let trim = values.len() / 10;
        let kept = &values[trim..values.len() - trim];
        kept.iter().sum::<f64>() / kept.len() as f64
    }

    fn top_k(&self, predictions: &[EstimatorPrediction]) -> f64 {
        let mut ranked: Vec<&EstimatorPrediction> = predictions.iter().collect();
        // Estimators without history sort last; ties keep arrival order
        ranked.sort_by(|a, b| {
            let mae_a = self.tracker.mae(&a.estimator_id).unwrap_or(f64::MAX);
            let mae_b = self.tracker.mae(&b.estimator_id).unwrap_or(f64::MAX);
            mae_a.total_cmp(&mae_b)
        });
        let k = self.config.top_k.min(ranked.len());
        ranked[..k].iter().map(|p| p.value).sum::<f64>() / k as f64
    }

    /// Confidence from inter-estimator agreement: inverse coefficient of
    /// variation, scaled by how much of the pool actually answered
    fn agreement_confidence(&self, predictions: &[EstimatorPrediction]) -> (f64, f64) {
        let n = predictions.len() as f64;
        let mean = predictions.iter().map(|p| p.value).sum::<f64>() / n;
        let dispersion = if predictions.len() < 2 || mean <= 0.0 {
            0.0
        } else {
            let variance =
                predictions.iter().map(|p| (p.value - mean).powi(2)).sum::<f64>() / (n - 1.0);
            variance.sqrt() / mean
        };

        let registered = self.estimators.len().max(predictions.len()) as f64;
        let participation = n / registered;
        let confidence = (100.0 / (1.0 + dispersion)) * participation;
        (confidence.clamp(0.0, 100.0), dispersion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::test_support::FixedEstimator;

    fn manager(method: AggregationMethod) -> EnsembleManager {
        EnsembleManager::new(EnsembleConfig {
            aggregation_method: method,
            ..Default::default()
        })
    }

    fn prediction(id: &str, value: f64) -> EstimatorPrediction {
        EstimatorPrediction {
            estimator_id: id.to_string(),
            value,
            confidence: 0.8,
            range: None,
        }
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut m = manager(AggregationMethod::WeightedAverage);
        m.register(Arc::new(FixedEstimator::new("a", 2.0, 0.8))).unwrap();
        let err = m
            .register(Arc::new(FixedEstimator::new("a", 3.0, 0.8)))
            .unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
        assert_eq!(m.len(), 1);
    }

    #[tokio::test]
    async fn test_predict_all_excludes_failures() {
        let mut m = manager(AggregationMethod::WeightedAverage);
        m.register(Arc::new(FixedEstimator::new("good", 2.0, 0.8))).unwrap();
        m.register(Arc::new(FixedEstimator::failing("bad"))).unwrap();

        let predictions = m.predict_all(&[2.0, 2.0, 2.0]).await;
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].estimator_id, "good");
    }

    #[tokio::test]
    async fn test_predict_all_excludes_bogus_values() {
        let mut m = manager(AggregationMethod::WeightedAverage);
        m.register(Arc::new(FixedEstimator::new("nan", f64::NAN, 0.8))).unwrap();
        m.register(Arc::new(FixedEstimator::new("sub_one", 0.2, 0.8))).unwrap();
        m.register(Arc::new(FixedEstimator::new("ok", 2.5, 0.8))).unwrap();

        let predictions = m.predict_all(&[2.0, 2.0]).await;
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].estimator_id, "ok");
    }

    #[test]
    fn test_aggregate_empty_is_insufficient_data() {
        let m = manager(AggregationMethod::WeightedAverage);
        let err = m.aggregate(&[]).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData(_)));
    }

    #[test]
    fn test_median_ignores_outlier() {
        let m = manager(AggregationMethod::Median);
        let predictions = vec![
            prediction("a", 2.0),
            prediction("b", 2.1),
            prediction("c", 8.0),
        ];
        let out = m.aggregate(&predictions).unwrap();
        assert!((out.value - 2.1).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_average_favors_low_mae() {
        let mut m = manager(AggregationMethod::WeightedAverage);
        // Seed MAEs of 0.1, 0.5 and 2.0 through the single writer path
        for i in 0..10 {
            let round = format!("r{i}");
            m.tracker_mut().record("a", &round, 2.1, 2.0, 0.15).unwrap();
            m.tracker_mut().record("b", &round, 2.5, 2.0, 0.15).unwrap();
            m.tracker_mut().record("c", &round, 4.0, 2.0, 0.15).unwrap();
        }

        let predictions = vec![
            prediction("a", 2.0),
            prediction("b", 2.5),
            prediction("c", 5.0),
        ];
        let out = m.aggregate(&predictions).unwrap();

        let plain_mean = (2.0 + 2.5 + 5.0) / 3.0;
        // Pulled toward the lowest-MAE estimator, away from the outlier
        assert!(out.value < plain_mean);
        assert!((out.value - 2.0).abs() < (out.value - 5.0).abs());

        // Sanity: with equal weights the pull disappears
        let fresh = manager(AggregationMethod::WeightedAverage);
        let equal = fresh.aggregate(&predictions).unwrap();
        assert!(out.value < equal.value);
    }

    #[test]
    fn test_trimmed_mean_drops_extremes() {
        let m = manager(AggregationMethod::TrimmedMean);
        let mut predictions: Vec<EstimatorPrediction> = (0..10)
            .map(|i| prediction(&format!("m{i}"), 2.0))
            .collect();
        predictions[0].value = 1.0; // low extreme
        predictions[9].value = 50.0; // high extreme
        let out = m.aggregate(&predictions).unwrap();
        assert!((out.value - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_top_k_uses_best_estimators() {
        let mut m = EnsembleManager::new(EnsembleConfig {
            aggregation_method: AggregationMethod::TopK,
            top_k: 2,
            ..Default::default()
        });
        for i in 0..10 {
            let round = format!("r{i}");
            m.tracker_mut().record("good1", &round, 2.0, 2.0, 0.15).unwrap();
            m.tracker_mut().record("good2", &round, 2.1, 2.0, 0.15).unwrap();
            m.tracker_mut().record("noisy", &round, 7.0, 2.0, 0.15).unwrap();
        }
        let predictions = vec![
            prediction("noisy", 9.0),
            prediction("good1", 2.0),
            prediction("good2", 2.2),
        ];
        let out = m.aggregate(&predictions).unwrap();
        assert!((out.value - 2.1).abs() < 1e-9);
    }

    #[test]
    fn test_agreement_confidence_falls_with_spread() {
        let m = manager(AggregationMethod::Median);
        let tight = m
            .aggregate(&[prediction("a", 2.0), prediction("b", 2.05), prediction("c", 2.1)])
            .unwrap();
        let wide = m
            .aggregate(&[prediction("a", 1.2), prediction("b", 4.0), prediction("c", 9.0)])
            .unwrap();
        assert!(tight.confidence > wide.confidence);
        assert!(tight.dispersion < wide.dispersion);
    }

    #[tokio::test]
    async fn test_partial_pool_lowers_confidence() {
        let mut m = manager(AggregationMethod::Median);
        m.register(Arc::new(FixedEstimator::new("a", 2.0, 0.8))).unwrap();
        m.register(Arc::new(FixedEstimator::new("b", 2.0, 0.8))).unwrap();
        m.register(Arc::new(FixedEstimator::failing("c"))).unwrap();
        m.register(Arc::new(FixedEstimator::failing("d"))).unwrap();

        let predictions = m.predict_all(&[2.0, 2.0]).await;
        let out = m.aggregate(&predictions).unwrap();
        // Two of four estimators answered in perfect agreement
        assert!((out.confidence - 50.0).abs() < 1e-9);
        assert_eq!(out.active, 2);
        assert_eq!(out.registered, 4);
    }
}
