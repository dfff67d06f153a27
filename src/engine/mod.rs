//! Prediction engine facade
//!
//! Single entry point for external collaborators:
//!
//! ```text
//! submit_outcome ─▶ resolve prior cycle ─▶ append history
//!        │
//!        ├─▶ EnsembleManager::predict_all ─▶ aggregate ──┐
//!        ├─▶ RuleEngine::evaluate ───────────────────────┤
//!        │                                               ▼
//!        └───────────────────────────────▶ SignalFusion::fuse ─▶ Decision
//! ```
//!
//! The pipeline is strictly ordered per round: grading always runs before
//! the next cycle's predictions, so the accuracy tracker has exactly one
//! writer path by construction. Estimators run concurrently inside
//! `predict_all` against an owned window snapshot; no engine state is held
//! across their await points.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::ensemble::{EnsembleManager, EstimatorAccuracy};
use crate::error::{EngineError, Result};
use crate::estimator::{Estimator, EstimatorPrediction};
use crate::fusion::{Decision, SignalFusion};
use crate::history::{Outcome, OutcomeHistory};
use crate::rules::RuleEngine;
use crate::validator::{PredictionValidator, ValidationRecord};

/// The cycle awaiting its ground truth
struct PendingCycle {
    predictions: Vec<EstimatorPrediction>,
    decision: Decision,
}

/// Owns the full prediction pipeline for one game stream
pub struct PredictionEngine {
    config: EngineConfig,
    history: OutcomeHistory,
    ensemble: EnsembleManager,
    rules: RuleEngine,
    fusion: SignalFusion,
    validator: PredictionValidator,
    pending: Option<PendingCycle>,
    latest_decision: Option<Decision>,
    rounds_since_fit: usize,
}

impl PredictionEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            history: OutcomeHistory::new(config.max_history),
            ensemble: EnsembleManager::new(config.ensemble.clone()),
            rules: RuleEngine::new(config.rules.clone()),
            fusion: SignalFusion::new(config.fusion.clone()),
            validator: PredictionValidator::new(config.validation.clone()),
            pending: None,
            latest_decision: None,
            rounds_since_fit: 0,
            config,
        })
    }

    /// Register an estimator; call at startup before the first outcome
    pub fn register_estimator(&mut self, estimator: Arc<dyn Estimator>) -> Result<()> {
        self.ensemble.register(estimator)
    }

    /// Feed one resolved round through the pipeline.
    ///
    /// Grades the prior cycle, appends to history and produces the next
    /// decision. Only boundary validation (malformed value, duplicate round)
    /// is surfaced; everything downstream degrades instead of failing.
    pub async fn submit_outcome(
        &mut self,
        value: f64,
        round_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let outcome = Outcome::new(round_id, value, timestamp)?;
        if self.history.contains_round(&outcome.round_id) {
            return Err(EngineError::InvalidOutcome(format!(
                "round '{}' already recorded",
                outcome.round_id
            )));
        }

        // Close the loop on the previous cycle before anything else reads
        // the tracker. Grading is best-effort: a failure here must never
        // block history growth.
        if let Some(pending) = self.pending.take() {
            match self.validator.resolve(
                self.ensemble.tracker_mut(),
                &pending.predictions,
                &pending.decision,
                &outcome,
            ) {
                Ok(record) => {
                    tracing::debug!(
                        round = %record.round_id,
                        decision_hit = record.decision_hit,
                        hit_rate = record.decision_hit_rate,
                        "graded prior cycle"
                    );
                }
                Err(e) => {
                    tracing::warn!(round = %outcome.round_id, error = %e, "grading skipped");
                }
            }
        }

        self.history.push(outcome.clone())?;

        // Periodic re-fit on the full retained history
        self.rounds_since_fit += 1;
        if self.config.ensemble.refit_interval > 0
            && self.rounds_since_fit >= self.config.ensemble.refit_interval
        {
            let all = self.history.all_values();
            self.ensemble.fit_all(&all).await;
            self.rounds_since_fit = 0;
        }

        let window = self.history.window(self.config.window_size);
        let predictions = self.ensemble.predict_all(&window).await;
        let ensemble_output = match self.ensemble.aggregate(&predictions) {
            Ok(output) => Some(output),
            Err(EngineError::InsufficientData(reason)) => {
                tracing::warn!(%reason, "no ensemble signal, falling back to rules");
                None
            }
            Err(e) => return Err(e),
        };

        let verdict = self.rules.evaluate(&window);
        let decision = self.fusion.fuse(
            ensemble_output.as_ref(),
            &verdict,
            &outcome.round_id,
            window.len(),
        );

        tracing::info!(
            round = %outcome.round_id,
            value = outcome.value,
            phase = verdict.phase.as_str(),
            burst = verdict.burst_probability,
            should_act = decision.should_act,
            target = decision.target,
            confidence = decision.confidence,
            "cycle complete"
        );

        self.pending = Some(PendingCycle {
            predictions,
            decision: decision.clone(),
        });
        self.latest_decision = Some(decision);
        Ok(())
    }

    /// Latest recommendation; pull-based, called after each `submit_outcome`
    pub fn get_decision(&self) -> Option<Decision> {
        self.latest_decision.clone()
    }

    /// Most recent grading result for external persistence, if any
    pub fn get_validation_record(&self) -> Option<ValidationRecord> {
        self.validator.latest().cloned()
    }

    /// Rolling share of graded decisions whose expected range was hit
    pub fn decision_hit_rate(&self) -> f64 {
        self.validator.decision_hit_rate()
    }

    /// Per-estimator accuracy summary for logging/dashboard collaborators
    pub fn accuracy_snapshot(&self) -> Vec<EstimatorAccuracy> {
        self.ensemble.tracker().snapshot()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn estimator_count(&self) -> usize {
        self.ensemble.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::test_support::FixedEstimator;
    use crate::rules::Phase;

    fn engine() -> PredictionEngine {
        PredictionEngine::new(EngineConfig::default()).unwrap()
    }

    async fn feed(engine: &mut PredictionEngine, values: &[f64]) {
        for (i, v) in values.iter().enumerate() {
            engine
                .submit_outcome(*v, &format!("r{i}"), Utc::now())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_rejects_malformed_outcome() {
        let mut e = engine();
        assert!(e.submit_outcome(0.0, "r1", Utc::now()).await.is_err());
        assert!(e.submit_outcome(f64::NAN, "r1", Utc::now()).await.is_err());
        assert_eq!(e.history_len(), 0);
    }

    #[tokio::test]
    async fn test_rejects_duplicate_round() {
        let mut e = engine();
        e.submit_outcome(2.0, "r1", Utc::now()).await.unwrap();
        let err = e.submit_outcome(3.0, "r1", Utc::now()).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidOutcome(_)));
        assert_eq!(e.history_len(), 1);
    }

    #[tokio::test]
    async fn test_decision_available_after_first_outcome() {
        let mut e = engine();
        e.register_estimator(Arc::new(FixedEstimator::new("fixed", 2.0, 0.8)))
            .unwrap();
        assert!(e.get_decision().is_none());
        e.submit_outcome(2.0, "r1", Utc::now()).await.unwrap();
        let decision = e.get_decision().unwrap();
        assert_eq!(decision.basis_round_id, "r1");
        // One outcome is far below the rule minimum window
        assert!(!decision.should_act);
    }

    #[tokio::test]
    async fn test_all_estimators_failing_still_produces_decision() {
        let mut e = engine();
        e.register_estimator(Arc::new(FixedEstimator::failing("dead1")))
            .unwrap();
        e.register_estimator(Arc::new(FixedEstimator::failing("dead2")))
            .unwrap();

        let values: Vec<f64> = (0..20).map(|i| 1.5 + (i % 3) as f64 * 0.4).collect();
        feed(&mut e, &values).await;

        let decision = e.get_decision().unwrap();
        assert!(decision
            .rationale
            .iter()
            .any(|r| r.contains("rule-only fallback")));
    }

    #[tokio::test]
    async fn test_validation_record_after_second_round() {
        let mut e = engine();
        e.register_estimator(Arc::new(FixedEstimator::new("fixed", 2.0, 0.8)))
            .unwrap();
        e.submit_outcome(2.0, "r1", Utc::now()).await.unwrap();
        assert!(e.get_validation_record().is_none());

        e.submit_outcome(2.1, "r2", Utc::now()).await.unwrap();
        let record = e.get_validation_record().unwrap();
        assert_eq!(record.round_id, "r2");
        assert_eq!(record.estimator_grades.len(), 1);
        assert_eq!(record.estimator_grades[0].estimator_id, "fixed");
    }

    #[tokio::test]
    async fn test_first_round_grading_is_noop() {
        let mut e = engine();
        e.register_estimator(Arc::new(FixedEstimator::new("fixed", 2.0, 0.8)))
            .unwrap();
        // No pending cycle exists yet; history must still grow
        e.submit_outcome(5.0, "r1", Utc::now()).await.unwrap();
        assert_eq!(e.history_len(), 1);
        assert!(e.get_validation_record().is_none());
    }

    #[tokio::test]
    async fn test_cool_down_phase_blocks_action() {
        let mut e = engine();
        // Perfectly confident estimator, but a clustered window keeps the
        // rules in cool-down
        e.register_estimator(Arc::new(FixedEstimator::new("sure", 2.0, 1.0)))
            .unwrap();
        let values = vec![2.0; 20];
        feed(&mut e, &values).await;

        let decision = e.get_decision().unwrap();
        assert_eq!(decision.phase, Phase::CoolDown);
        assert!(!decision.should_act);
    }

    #[tokio::test]
    async fn test_accuracy_accumulates_across_rounds() {
        let mut e = engine();
        e.register_estimator(Arc::new(FixedEstimator::new("fixed", 2.0, 0.8)))
            .unwrap();
        let values = vec![2.0, 2.1, 1.9, 2.0, 2.2, 2.0];
        feed(&mut e, &values).await;

        let snapshot = e.accuracy_snapshot();
        assert_eq!(snapshot.len(), 1);
        // Every round after the first grades the prior prediction
        assert_eq!(snapshot[0].graded, values.len() - 1);
        assert!(snapshot[0].mae.unwrap() < 0.3);
    }
}
