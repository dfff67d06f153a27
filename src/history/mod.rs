//! Outcome history
//!
//! Append-only record of resolved round multipliers. Insertion order is
//! chronological; duplicate round ids are rejected at the boundary. All
//! consumers read bounded trailing windows as owned snapshots, so readers
//! never hold a reference into the live buffer while the appender runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

use crate::error::{EngineError, Result};

/// A single resolved round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub round_id: String,
    /// Round multiplier, always >= 1.0
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Outcome {
    /// Build a validated outcome; the value must be a finite multiplier >= 1.0
    pub fn new(round_id: impl Into<String>, value: f64, timestamp: DateTime<Utc>) -> Result<Self> {
        let round_id = round_id.into();
        if round_id.is_empty() {
            return Err(EngineError::InvalidOutcome("empty round id".into()));
        }
        if !value.is_finite() || value < 1.0 {
            return Err(EngineError::InvalidOutcome(format!(
                "multiplier must be a finite value >= 1.0, got {value}"
            )));
        }
        Ok(Self {
            round_id,
            value,
            timestamp,
        })
    }
}

/// Bounded chronological sequence of outcomes
pub struct OutcomeHistory {
    outcomes: VecDeque<Outcome>,
    /// Round ids currently retained, for duplicate rejection
    retained_ids: HashSet<String>,
    max_history: usize,
}

impl OutcomeHistory {
    pub fn new(max_history: usize) -> Self {
        Self {
            outcomes: VecDeque::with_capacity(max_history.min(1024)),
            retained_ids: HashSet::new(),
            max_history,
        }
    }

    /// Append a resolved round, evicting the oldest entry once full
    pub fn push(&mut self, outcome: Outcome) -> Result<()> {
        if self.retained_ids.contains(&outcome.round_id) {
            return Err(EngineError::InvalidOutcome(format!(
                "round '{}' already recorded",
                outcome.round_id
            )));
        }
        if self.outcomes.len() >= self.max_history {
            if let Some(old) = self.outcomes.pop_front() {
                self.retained_ids.remove(&old.round_id);
            }
        }
        self.retained_ids.insert(outcome.round_id.clone());
        self.outcomes.push_back(outcome);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn last(&self) -> Option<&Outcome> {
        self.outcomes.back()
    }

    pub fn contains_round(&self, round_id: &str) -> bool {
        self.retained_ids.contains(round_id)
    }

    /// Snapshot of at most the `n` most recent multiplier values, oldest first
    pub fn window(&self, n: usize) -> Vec<f64> {
        let start = self.outcomes.len().saturating_sub(n);
        self.outcomes.iter().skip(start).map(|o| o.value).collect()
    }

    /// Snapshot of every retained multiplier value, oldest first
    pub fn all_values(&self) -> Vec<f64> {
        self.outcomes.iter().map(|o| o.value).collect()
    }

    /// Mean of the trailing `n` values
    pub fn recent_mean(&self, n: usize) -> Option<f64> {
        let window = self.window(n);
        if window.is_empty() {
            return None;
        }
        Some(window.iter().sum::<f64>() / window.len() as f64)
    }

    /// Sample standard deviation of the trailing `n` values
    pub fn recent_std(&self, n: usize) -> Option<f64> {
        let window = self.window(n);
        if window.len() < 2 {
            return None;
        }
        let mean = window.iter().sum::<f64>() / window.len() as f64;
        let variance =
            window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (window.len() - 1) as f64;
        Some(variance.sqrt())
    }
}
