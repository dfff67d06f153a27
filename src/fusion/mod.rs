//! Signal fusion
//!
//! Merges the ensemble's numeric prediction with the rule engine's verdict
//! into one actionable [`Decision`]. The rule engine's cool-down phase is a
//! hard veto: no level of numeric confidence recommends action through it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::FusionConfig;
use crate::ensemble::EnsembleOutput;
use crate::rules::{Phase, RuleVerdict};

/// Fusion strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FusionMode {
    /// Ensemble drives the target; rules only veto via phase and risk
    ConservativeOnly,
    /// Rule engine drives the target; ensemble is a confidence sanity-check
    AggressiveOnly,
    /// Ensemble target unless the rules call a confident burst
    #[default]
    Hybrid,
}

/// Risk classification attached to every decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// One cycle's actionable recommendation
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    /// Round whose resolution produced this decision; the next outcome
    /// grades it
    pub basis_round_id: String,
    /// Length of the window the decision was computed from
    pub window_len: usize,
    pub should_act: bool,
    /// Recommended cash-out multiplier
    pub target: f64,
    /// Combined confidence (0-100)
    pub confidence: f64,
    /// Ordered contributing reasons
    pub rationale: Vec<String>,
    pub risk: RiskLevel,
    /// Rule phase at decision time
    pub phase: Phase,
    pub timestamp: DateTime<Utc>,
}

/// Combines ensemble output and rule verdict per the configured mode
pub struct SignalFusion {
    config: FusionConfig,
}

impl SignalFusion {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    pub fn fuse(
        &self,
        ensemble: Option<&EnsembleOutput>,
        verdict: &RuleVerdict,
        basis_round_id: &str,
        window_len: usize,
    ) -> Decision {
        match ensemble {
            Some(output) => self.fuse_with_ensemble(output, verdict, basis_round_id, window_len),
            None => self.rule_only_fallback(verdict, basis_round_id, window_len),
        }
    }

    fn fuse_with_ensemble(
        &self,
        output: &EnsembleOutput,
        verdict: &RuleVerdict,
        basis_round_id: &str,
        window_len: usize,
    ) -> Decision {
        let burst = verdict.burst_probability;

        let (target, confidence, tie_break) = match self.config.mode {
            FusionMode::ConservativeOnly => (
                output.value,
                output.confidence,
                "ensemble target (conservative mode)".to_string(),
            ),
            FusionMode::AggressiveOnly => {
                let target = verdict.suggested_target.unwrap_or(output.value);
                // Ensemble only sanity-checks the rule read here
                let mut confidence = burst * 100.0;
                if output.confidence < 30.0 {
                    confidence *= 0.7;
                }
                (target, confidence, "rule-driven target (aggressive mode)".to_string())
            }
            FusionMode::Hybrid => {
                let w = self.config.ensemble_confidence_weight;
                let confidence = w * output.confidence + (1.0 - w) * burst * 100.0;
                let rule_takeover = verdict.phase == Phase::Burst
                    && burst >= self.config.burst_override_threshold;
                match (rule_takeover, verdict.suggested_target) {
                    (true, Some(target)) => {
                        (target, confidence, "rule-driven target (burst override)".to_string())
                    }
                    _ => (output.value, confidence, "ensemble target".to_string()),
                }
            }
        };

        let confidence = confidence.clamp(0.0, 100.0);
        let vetoed = verdict.phase == Phase::CoolDown;
        let should_act = !vetoed
            && !verdict.insufficient_data
            && confidence >= self.config.action_confidence_threshold;

        let risk = if verdict.volatility_flag || output.dispersion > self.config.dispersion_high_risk
        {
            RiskLevel::High
        } else if confidence >= self.config.low_risk_confidence {
            RiskLevel::Low
        } else {
            RiskLevel::Medium
        };

        let mut rationale = vec![
            format!("aggregation: {}", output.method.as_str()),
            format!("active estimators: {}/{}", output.active, output.registered),
            fired_line(verdict),
            format!("tie-break: {tie_break}"),
        ];
        if vetoed && confidence >= self.config.action_confidence_threshold {
            rationale.push("cool-down veto applied".to_string());
        }

        Decision {
            basis_round_id: basis_round_id.to_string(),
            window_len,
            should_act,
            target: target.max(1.01),
            confidence,
            rationale,
            risk,
            phase: verdict.phase,
            timestamp: Utc::now(),
        }
    }

    /// No numeric signal this cycle: act only on a strong rule read, and
    /// never claim more than middling confidence
    fn rule_only_fallback(
        &self,
        verdict: &RuleVerdict,
        basis_round_id: &str,
        window_len: usize,
    ) -> Decision {
        let burst = verdict.burst_probability;
        let confidence = (burst * 100.0).min(50.0);
        let should_act = !verdict.insufficient_data
            && verdict.phase != Phase::CoolDown
            && burst >= self.config.fallback_burst_threshold;

        let risk = if verdict.volatility_flag {
            RiskLevel::High
        } else {
            RiskLevel::Medium
        };

        let rationale = vec![
            "no ensemble signal this cycle, rule-only fallback".to_string(),
            "active estimators: 0".to_string(),
            fired_line(verdict),
            "tie-break: rule-driven target (fallback)".to_string(),
        ];

        Decision {
            basis_round_id: basis_round_id.to_string(),
            window_len,
            should_act,
            target: verdict.suggested_target.unwrap_or(1.5).max(1.01),
            confidence,
            rationale,
            risk,
            phase: verdict.phase,
            timestamp: Utc::now(),
        }
    }
}

fn fired_line(verdict: &RuleVerdict) -> String {
    if verdict.insufficient_data {
        "rules: insufficient data".to_string()
    } else if verdict.fired_rules.is_empty() {
        "rules fired: none".to_string()
    } else {
        format!("rules fired: {}", verdict.fired_rules.join(", "))
    }
}
