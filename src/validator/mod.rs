//! Prediction validation
//!
//! Closes the feedback loop: once a round resolves, the previous cycle's
//! estimator predictions and decision are graded against the actual outcome.
//! Per-estimator grades flow into the [`AccuracyTracker`] through its single
//! writer path; decision hits feed a rolling hit-rate that is independent of
//! any one estimator.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};

use crate::config::ValidationConfig;
use crate::ensemble::{AccuracyTracker, Trend};
use crate::error::{EngineError, Result};
use crate::estimator::EstimatorPrediction;
use crate::fusion::Decision;
use crate::history::Outcome;
use crate::rules::Phase;

/// One estimator's grade for a single round
#[derive(Debug, Clone, Serialize)]
pub struct EstimatorGrade {
    pub estimator_id: String,
    pub predicted: f64,
    pub abs_error: f64,
    pub within_tolerance: bool,
}

/// Grading result for one resolved round, handed to the external
/// persistence collaborator
#[derive(Debug, Clone, Serialize)]
pub struct ValidationRecord {
    /// Round that resolved and was graded against
    pub round_id: String,
    pub actual: f64,
    pub estimator_grades: Vec<EstimatorGrade>,
    /// Whether the actual landed within the decision's expected range
    pub decision_hit: bool,
    pub decision_target: f64,
    pub phase_at_decision_time: Phase,
    /// Rolling share of graded decisions that hit
    pub decision_hit_rate: f64,
    pub timestamp: DateTime<Utc>,
}

/// Grades prior cycles against resolved outcomes
pub struct PredictionValidator {
    config: ValidationConfig,
    decision_hits: VecDeque<bool>,
    /// Rounds already resolved, pruned alongside the hit window
    resolved_rounds: HashSet<String>,
    resolved_order: VecDeque<String>,
    last_record: Option<ValidationRecord>,
}

impl PredictionValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            config,
            decision_hits: VecDeque::new(),
            resolved_rounds: HashSet::new(),
            resolved_order: VecDeque::new(),
            last_record: None,
        }
    }

    /// Grade the prior cycle against the newly resolved outcome.
    ///
    /// Re-resolving the same round is rejected before any state changes, so
    /// a duplicate call can never double-count.
    pub fn resolve(
        &mut self,
        tracker: &mut AccuracyTracker,
        prior_predictions: &[EstimatorPrediction],
        prior_decision: &Decision,
        actual: &Outcome,
    ) -> Result<ValidationRecord> {
        if self.resolved_rounds.contains(&actual.round_id) {
            return Err(EngineError::DuplicateGrading {
                scope: "decision".to_string(),
                round_id: actual.round_id.clone(),
            });
        }

        let tolerance = self.config.tolerance_pct;
        let mut grades = Vec::with_capacity(prior_predictions.len());
        for prediction in prior_predictions {
            match tracker.record(
                &prediction.estimator_id,
                &actual.round_id,
                prediction.value,
                actual.value,
                tolerance,
            ) {
                Ok(()) => {
                    let abs_error = (prediction.value - actual.value).abs();
                    grades.push(EstimatorGrade {
                        estimator_id: prediction.estimator_id.clone(),
                        predicted: prediction.value,
                        abs_error,
                        within_tolerance: abs_error / actual.value <= tolerance,
                    });
                }
                Err(e) => {
                    // A stale guard entry is containable; the rest of the
                    // cycle still grades
                    tracing::warn!(
                        estimator = %prediction.estimator_id,
                        round = %actual.round_id,
                        error = %e,
                        "skipping estimator grade"
                    );
                }
            }
        }

        let decision_hit = (actual.value - prior_decision.target).abs()
            <= prior_decision.target * tolerance;
        if self.decision_hits.len() >= self.config.decision_window {
            self.decision_hits.pop_front();
        }
        self.decision_hits.push_back(decision_hit);

        self.mark_resolved(actual.round_id.clone());

        let record = ValidationRecord {
            round_id: actual.round_id.clone(),
            actual: actual.value,
            estimator_grades: grades,
            decision_hit,
            decision_target: prior_decision.target,
            phase_at_decision_time: prior_decision.phase,
            decision_hit_rate: self.decision_hit_rate(),
            timestamp: Utc::now(),
        };
        self.last_record = Some(record.clone());
        Ok(record)
    }

    /// Most recent grading result, if any round has resolved with priors
    pub fn latest(&self) -> Option<&ValidationRecord> {
        self.last_record.as_ref()
    }

    /// Rolling share of graded decisions whose expected range was hit
    pub fn decision_hit_rate(&self) -> f64 {
        if self.decision_hits.is_empty() {
            return 0.0;
        }
        let hits = self.decision_hits.iter().filter(|h| **h).count();
        hits as f64 / self.decision_hits.len() as f64
    }

    pub fn graded_decisions(&self) -> usize {
        self.decision_hits.len()
    }

    /// Compare the decision hit-rate over the most recent third of the
    /// window against the earliest third
    pub fn decision_trend(&self) -> Trend {
        let n = self.decision_hits.len();
        let third = n / 3;
        if third < 2 {
            return Trend::Stable;
        }
        let rate = |slice: &[&bool]| {
            slice.iter().filter(|h| ***h).count() as f64 / slice.len() as f64
        };
        let hits: Vec<&bool> = self.decision_hits.iter().collect();
        let early = rate(&hits[..third]);
        let recent = rate(&hits[n - third..]);

        let threshold = self.config.trend_threshold_pct;
        if recent > early + threshold {
            Trend::Improving
        } else if recent + threshold < early {
            Trend::Degrading
        } else {
            Trend::Stable
        }
    }

    fn mark_resolved(&mut self, round_id: String) {
        if self.resolved_order.len() >= self.config.decision_window {
            if let Some(old) = self.resolved_order.pop_front() {
                self.resolved_rounds.remove(&old);
            }
        }
        self.resolved_rounds.insert(round_id.clone());
        self.resolved_order.push_back(round_id);
    }
}
