//! Pattern-rule engine
//!
//! Evaluates a fixed, ordered catalog of deterministic rules against the
//! trailing outcome window and classifies the current phase. The engine holds
//! only the catalog and its thresholds; the phase is recomputed from scratch
//! every cycle as a pure function of the window, so a restart can never leave
//! a stale phase behind.

mod catalog;

use serde::{Deserialize, Serialize};

use crate::config::RuleConfig;
use catalog::build_catalog;

/// Phase of the outcome stream, cycling COOL_DOWN -> BUILDING -> BURST
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Action is vetoed regardless of numeric confidence
    CoolDown,
    /// Conditions consistent with pressure building toward a high outcome
    Building,
    /// An above-average outcome looks imminent
    Burst,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::CoolDown => "COOL_DOWN",
            Phase::Building => "BUILDING",
            Phase::Burst => "BURST",
        }
    }
}

/// Output of one rule evaluation cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleVerdict {
    pub phase: Phase,
    /// Probability-like burst score in [0, 1]
    pub burst_probability: f64,
    /// Rule ids that fired, in catalog order
    pub fired_rules: Vec<&'static str>,
    pub suggested_target: Option<f64>,
    /// Set when the window was too short to classify
    pub insufficient_data: bool,
    /// Set when the variance rule flagged an unstable window
    pub volatility_flag: bool,
}

impl RuleVerdict {
    fn insufficient() -> Self {
        Self {
            phase: Phase::CoolDown,
            burst_probability: 0.0,
            fired_rules: Vec::new(),
            suggested_target: None,
            insufficient_data: true,
            volatility_flag: false,
        }
    }

    pub fn fired(&self, rule_id: &str) -> bool {
        self.fired_rules.iter().any(|id| *id == rule_id)
    }
}

/// Everything a rule may look at
pub(crate) struct RuleContext<'a> {
    pub window: &'a [f64],
    pub config: &'a RuleConfig,
    /// Ids of rules that already fired this cycle, in catalog order
    pub fired: &'a [&'static str],
}

/// One rule's contribution to the cycle verdict
pub(crate) struct RuleContribution {
    pub burst_delta: f64,
    pub phase_hint: Option<Phase>,
    pub target_hint: Option<f64>,
    pub detail: String,
}

/// A deterministic pattern rule: a pure function of window and config
pub(crate) trait Rule: Send + Sync {
    fn id(&self) -> &'static str;
    fn evaluate(&self, ctx: &RuleContext) -> Option<RuleContribution>;
}

/// Ordered rule catalog evaluator
pub struct RuleEngine {
    rules: Vec<Box<dyn Rule>>,
    config: RuleConfig,
}

impl RuleEngine {
    pub fn new(config: RuleConfig) -> Self {
        Self {
            rules: build_catalog(),
            config,
        }
    }

    /// Evaluate the full catalog against the window.
    ///
    /// Never fails: a window shorter than `min_window` yields a COOL_DOWN
    /// verdict with the `insufficient_data` flag set.
    pub fn evaluate(&self, window: &[f64]) -> RuleVerdict {
        if window.len() < self.config.min_window {
            return RuleVerdict::insufficient();
        }

        let mut fired: Vec<&'static str> = Vec::new();
        let mut burst = 0.0;
        let mut phase_hint: Option<Phase> = None;
        let mut target_hint: Option<f64> = None;

        for rule in &self.rules {
            let ctx = RuleContext {
                window,
                config: &self.config,
                fired: &fired,
            };
            if let Some(contribution) = rule.evaluate(&ctx) {
                tracing::debug!(rule = rule.id(), detail = %contribution.detail, "rule fired");
                fired.push(rule.id());
                burst += contribution.burst_delta;
                // First (highest-priority) hint wins
                if phase_hint.is_none() {
                    phase_hint = contribution.phase_hint;
                }
                if target_hint.is_none() {
                    target_hint = contribution.target_hint;
                }
            }
        }

        let volatility_flag = fired.contains(&"R5");
        if volatility_flag {
            // Extreme variance halves our trust in the burst score
            burst *= 0.5;
        }
        let burst_probability = burst.clamp(0.0, 1.0);

        let phase = if burst_probability >= self.config.burst_phase_threshold {
            Phase::Burst
        } else {
            phase_hint.unwrap_or(Phase::CoolDown)
        };

        let suggested_target = self.suggest_target(phase, window, target_hint);

        RuleVerdict {
            phase,
            burst_probability,
            fired_rules: fired,
            suggested_target,
            insufficient_data: false,
            volatility_flag,
        }
    }

    fn suggest_target(
        &self,
        phase: Phase,
        window: &[f64],
        direction_hint: Option<f64>,
    ) -> Option<f64> {
        match phase {
            Phase::CoolDown => None,
            Phase::Building => {
                let mean = window.iter().sum::<f64>() / window.len() as f64;
                let base = direction_hint.unwrap_or(mean);
                Some(base.clamp(1.2, self.config.conservative_target_cap))
            }
            Phase::Burst => {
                // Aggressive target sized from the magnitude of recent spikes
                let mut highs: Vec<f64> = window
                    .iter()
                    .copied()
                    .filter(|v| *v >= self.config.spike_multiplier)
                    .collect();
                let base = if highs.is_empty() {
                    window.iter().copied().fold(f64::MIN, f64::max)
                } else {
                    highs.sort_by(f64::total_cmp);
                    highs[highs.len() / 2]
                };
                Some(base.clamp(2.0, self.config.max_target))
            }
        }
    }
}
