//! Per-estimator accuracy tracking
//!
//! One writer path: every graded round goes through [`AccuracyTracker::record`],
//! which also enforces at-most-once grading per (estimator, round) and trims
//! the trailing window so stale performance decays.

use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{EngineError, Result};

/// Direction of a rolling accuracy metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Trend {
    Improving,
    Stable,
    Degrading,
}

#[derive(Debug, Clone)]
struct GradeSample {
    round_id: String,
    abs_error: f64,
    sq_error: f64,
    within_tolerance: bool,
}

#[derive(Debug, Default)]
struct EstimatorRecord {
    samples: VecDeque<GradeSample>,
    /// Round ids currently inside the sample window; the idempotency guard
    /// covers exactly the trailing window
    graded_rounds: HashSet<String>,
}

/// Point-in-time accuracy summary for one estimator
#[derive(Debug, Clone, Serialize)]
pub struct EstimatorAccuracy {
    pub estimator_id: String,
    pub graded: usize,
    pub mae: Option<f64>,
    pub rmse: Option<f64>,
    pub hit_rate: Option<f64>,
    pub weight: f64,
    pub trend: Trend,
}

/// Rolling per-estimator error statistics
pub struct AccuracyTracker {
    records: HashMap<String, EstimatorRecord>,
    window: usize,
    baseline_weight: f64,
    trend_threshold_pct: f64,
}

impl AccuracyTracker {
    pub fn new(window: usize, baseline_weight: f64, trend_threshold_pct: f64) -> Self {
        Self {
            records: HashMap::new(),
            window: window.max(1),
            baseline_weight,
            trend_threshold_pct,
        }
    }

    /// Grade one prediction against the resolved value.
    ///
    /// Rejects a second grade for the same (estimator, round) so a re-run
    /// resolve can never double-count.
    pub fn record(
        &mut self,
        estimator_id: &str,
        round_id: &str,
        predicted: f64,
        actual: f64,
        tolerance_pct: f64,
    ) -> Result<()> {
        let record = self.records.entry(estimator_id.to_string()).or_default();
        if record.graded_rounds.contains(round_id) {
            return Err(EngineError::DuplicateGrading {
                scope: estimator_id.to_string(),
                round_id: round_id.to_string(),
            });
        }

        let abs_error = (predicted - actual).abs();
        let within_tolerance = actual > 0.0 && abs_error / actual <= tolerance_pct;

        if record.samples.len() >= self.window {
            if let Some(evicted) = record.samples.pop_front() {
                record.graded_rounds.remove(&evicted.round_id);
            }
        }
        record.graded_rounds.insert(round_id.to_string());
        record.samples.push_back(GradeSample {
            round_id: round_id.to_string(),
            abs_error,
            sq_error: abs_error * abs_error,
            within_tolerance,
        });
        Ok(())
    }

    /// Mean absolute error over the trailing window
    pub fn mae(&self, estimator_id: &str) -> Option<f64> {
        let record = self.records.get(estimator_id)?;
        if record.samples.is_empty() {
            return None;
        }
        let sum: f64 = record.samples.iter().map(|s| s.abs_error).sum();
        Some(sum / record.samples.len() as f64)
    }

    /// Root mean squared error over the trailing window
    pub fn rmse(&self, estimator_id: &str) -> Option<f64> {
        let record = self.records.get(estimator_id)?;
        if record.samples.is_empty() {
            return None;
        }
        let sum: f64 = record.samples.iter().map(|s| s.sq_error).sum();
        Some((sum / record.samples.len() as f64).sqrt())
    }

    /// Share of graded rounds landing within tolerance
    pub fn hit_rate(&self, estimator_id: &str) -> Option<f64> {
        let record = self.records.get(estimator_id)?;
        if record.samples.is_empty() {
            return None;
        }
        let hits = record.samples.iter().filter(|s| s.within_tolerance).count();
        Some(hits as f64 / record.samples.len() as f64)
    }

    /// Current ensemble weight: 1/(1+MAE), baseline until the first grade
    pub fn weight(&self, estimator_id: &str) -> f64 {
        match self.mae(estimator_id) {
            Some(mae) => 1.0 / (1.0 + mae),
            None => self.baseline_weight,
        }
    }

    pub fn graded_count(&self, estimator_id: &str) -> usize {
        self.records
            .get(estimator_id)
            .map(|r| r.samples.len())
            .unwrap_or(0)
    }

    /// Compare MAE over the most recent third of the window against the
    /// earliest third
    pub fn trend(&self, estimator_id: &str) -> Trend {
        let record = match self.records.get(estimator_id) {
            Some(r) => r,
            None => return Trend::Stable,
        };
        let n = record.samples.len();
        let third = n / 3;
        if third < 2 {
            return Trend::Stable;
        }

        let early: f64 = record
            .samples
            .iter()
            .take(third)
            .map(|s| s.abs_error)
            .sum::<f64>()
            / third as f64;
        let recent: f64 = record
            .samples
            .iter()
            .skip(n - third)
            .map(|s| s.abs_error)
            .sum::<f64>()
            / third as f64;

        if early <= f64::EPSILON {
            return if recent <= f64::EPSILON {
                Trend::Stable
            } else {
                Trend::Degrading
            };
        }
        let change = (recent - early) / early;
        if change < -self.trend_threshold_pct {
            Trend::Improving
        } else if change > self.trend_threshold_pct {
            Trend::Degrading
        } else {
            Trend::Stable
        }
    }

    /// Summary of every tracked estimator, sorted by id for stable output
    pub fn snapshot(&self) -> Vec<EstimatorAccuracy> {
        let mut out: Vec<EstimatorAccuracy> = self
            .records
            .keys()
            .map(|id| EstimatorAccuracy {
                estimator_id: id.clone(),
                graded: self.graded_count(id),
                mae: self.mae(id),
                rmse: self.rmse(id),
                hit_rate: self.hit_rate(id),
                weight: self.weight(id),
                trend: self.trend(id),
            })
            .collect();
        out.sort_by(|a, b| a.estimator_id.cmp(&b.estimator_id));
        out
    }
}
