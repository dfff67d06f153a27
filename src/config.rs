//! Engine configuration
//!
//! All tunables live in a single [`EngineConfig`] object handed to
//! [`crate::engine::PredictionEngine::new`]. The rule thresholds are
//! hand-tuned heuristics carried over from live operation, not statistically
//! validated cutoffs — treat them as starting points and tune per deployment.

use serde::{Deserialize, Serialize};

use crate::ensemble::AggregationMethod;
use crate::error::{EngineError, Result};
use crate::fusion::FusionMode;

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Trailing window handed to estimators and the rule engine
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Total retained outcomes before the oldest are dropped
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    #[serde(default)]
    pub ensemble: EnsembleConfig,
    #[serde(default)]
    pub rules: RuleConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

fn default_window_size() -> usize {
    50
}

fn default_max_history() -> usize {
    500
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            max_history: default_max_history(),
            ensemble: EnsembleConfig::default(),
            rules: RuleConfig::default(),
            fusion: FusionConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file, applying defaults for missing keys
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(std::path::Path::new(path)))
            .build()
            .map_err(|e| EngineError::Configuration(e.to_string()))?;

        let cfg: EngineConfig = settings
            .try_deserialize()
            .map_err(|e| EngineError::Configuration(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject malformed values before the engine starts
    pub fn validate(&self) -> Result<()> {
        if self.window_size < self.rules.min_window {
            return Err(EngineError::Configuration(format!(
                "window_size {} is smaller than rules.min_window {}",
                self.window_size, self.rules.min_window
            )));
        }
        if self.max_history < self.window_size {
            return Err(EngineError::Configuration(format!(
                "max_history {} is smaller than window_size {}",
                self.max_history, self.window_size
            )));
        }
        self.ensemble.validate()?;
        self.rules.validate()?;
        self.fusion.validate()?;
        self.validation.validate()?;
        Ok(())
    }
}

/// Ensemble and accuracy-tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    /// How per-estimator predictions are combined
    #[serde(default)]
    pub aggregation_method: AggregationMethod,
    /// Weight assigned to estimators with no graded history yet
    #[serde(default = "default_baseline_weight")]
    pub baseline_weight: f64,
    /// Number of estimators used by the `top_k` method
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Per-estimator predict timeout; stragglers are discarded
    #[serde(default = "default_timeout_ms")]
    pub per_estimator_timeout_ms: u64,
    /// Re-fit all estimators every N resolved rounds (0 disables)
    #[serde(default = "default_refit_interval")]
    pub refit_interval: usize,
    /// Graded rounds retained per estimator for MAE/hit-rate
    #[serde(default = "default_accuracy_window")]
    pub accuracy_window: usize,
    /// Relative MAE change separating IMPROVING/DEGRADING from STABLE
    #[serde(default = "default_trend_threshold")]
    pub trend_threshold_pct: f64,
}

fn default_baseline_weight() -> f64 {
    0.5
}

fn default_top_k() -> usize {
    3
}

fn default_timeout_ms() -> u64 {
    2_000
}

fn default_refit_interval() -> usize {
    10
}

fn default_accuracy_window() -> usize {
    200
}

fn default_trend_threshold() -> f64 {
    0.10
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            aggregation_method: AggregationMethod::default(),
            baseline_weight: default_baseline_weight(),
            top_k: default_top_k(),
            per_estimator_timeout_ms: default_timeout_ms(),
            refit_interval: default_refit_interval(),
            accuracy_window: default_accuracy_window(),
            trend_threshold_pct: default_trend_threshold(),
        }
    }
}

impl EnsembleConfig {
    fn validate(&self) -> Result<()> {
        if self.baseline_weight <= 0.0 || self.baseline_weight > 1.0 {
            return Err(EngineError::Configuration(format!(
                "baseline_weight must be in (0, 1], got {}",
                self.baseline_weight
            )));
        }
        if self.top_k == 0 {
            return Err(EngineError::Configuration("top_k must be >= 1".into()));
        }
        if self.per_estimator_timeout_ms == 0 {
            return Err(EngineError::Configuration(
                "per_estimator_timeout_ms must be > 0".into(),
            ));
        }
        if self.accuracy_window < 3 {
            return Err(EngineError::Configuration(
                "accuracy_window must be >= 3".into(),
            ));
        }
        Ok(())
    }
}

/// Pattern-rule thresholds
///
/// Defaults mirror the values used in live operation; none of them are
/// validated against labeled ground truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Windows shorter than this produce an insufficient-data verdict
    #[serde(default = "default_min_window")]
    pub min_window: usize,
    /// Outcomes below this count as "low" (R1)
    #[serde(default = "default_low_multiplier")]
    pub low_multiplier: f64,
    /// Outcomes at or above this count as "high" for gap tracking (R2)
    #[serde(default = "default_gap_multiplier")]
    pub gap_multiplier: f64,
    /// Outcomes at or above this count as spikes (R3, R8, targets)
    #[serde(default = "default_spike_multiplier")]
    pub spike_multiplier: f64,
    /// Consecutive low outcomes needed for R1
    #[serde(default = "default_low_series_len")]
    pub low_series_len: usize,
    /// Lookback for the no-high gap rule R2
    #[serde(default = "default_gap_window")]
    pub gap_window: usize,
    /// Lookback for the post-spike echo rule R3
    #[serde(default = "default_echo_window")]
    pub echo_window: usize,
    /// Lookback for the monotonic-direction rule R7
    #[serde(default = "default_direction_window")]
    pub direction_window: usize,
    /// Trailing std-dev above this flags extreme variance (R5)
    #[serde(default = "default_volatility_std")]
    pub volatility_std_threshold: f64,
    /// Relative band width for the cluster rule R6
    #[serde(default = "default_cluster_band")]
    pub cluster_band_pct: f64,
    /// Minimum run length for the cluster rule R6
    #[serde(default = "default_cluster_len")]
    pub cluster_len: usize,
    /// Lookback (split into three chunks) for the delayed-spike rule R8
    #[serde(default = "default_buildup_window")]
    pub buildup_window: usize,
    /// Burst probability at or above this classifies the phase as BURST
    #[serde(default = "default_burst_phase_threshold")]
    pub burst_phase_threshold: f64,
    /// Ceiling for aggressive (burst-phase) suggested targets
    #[serde(default = "default_max_target")]
    pub max_target: f64,
    /// Ceiling for conservative (building-phase) suggested targets
    #[serde(default = "default_conservative_cap")]
    pub conservative_target_cap: f64,
}

fn default_min_window() -> usize {
    10
}

fn default_low_multiplier() -> f64 {
    2.0
}

fn default_gap_multiplier() -> f64 {
    20.0
}

fn default_spike_multiplier() -> f64 {
    10.0
}

fn default_low_series_len() -> usize {
    4
}

fn default_gap_window() -> usize {
    50
}

fn default_echo_window() -> usize {
    5
}

fn default_direction_window() -> usize {
    5
}

fn default_volatility_std() -> f64 {
    5.0
}

fn default_cluster_band() -> f64 {
    0.05
}

fn default_cluster_len() -> usize {
    4
}

fn default_buildup_window() -> usize {
    12
}

fn default_burst_phase_threshold() -> f64 {
    0.7
}

fn default_max_target() -> f64 {
    10.0
}

fn default_conservative_cap() -> f64 {
    2.0
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            min_window: default_min_window(),
            low_multiplier: default_low_multiplier(),
            gap_multiplier: default_gap_multiplier(),
            spike_multiplier: default_spike_multiplier(),
            low_series_len: default_low_series_len(),
            gap_window: default_gap_window(),
            echo_window: default_echo_window(),
            direction_window: default_direction_window(),
            volatility_std_threshold: default_volatility_std(),
            cluster_band_pct: default_cluster_band(),
            cluster_len: default_cluster_len(),
            buildup_window: default_buildup_window(),
            burst_phase_threshold: default_burst_phase_threshold(),
            max_target: default_max_target(),
            conservative_target_cap: default_conservative_cap(),
        }
    }
}

impl RuleConfig {
    fn validate(&self) -> Result<()> {
        if self.min_window == 0 {
            return Err(EngineError::Configuration("min_window must be > 0".into()));
        }
        if self.low_multiplier < 1.0 {
            return Err(EngineError::Configuration(
                "low_multiplier must be >= 1.0".into(),
            ));
        }
        if self.spike_multiplier <= self.low_multiplier {
            return Err(EngineError::Configuration(format!(
                "spike_multiplier {} must exceed low_multiplier {}",
                self.spike_multiplier, self.low_multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.burst_phase_threshold) {
            return Err(EngineError::Configuration(
                "burst_phase_threshold must be in [0, 1]".into(),
            ));
        }
        if self.cluster_band_pct <= 0.0 || self.cluster_band_pct >= 1.0 {
            return Err(EngineError::Configuration(
                "cluster_band_pct must be in (0, 1)".into(),
            ));
        }
        if self.buildup_window < 6 {
            return Err(EngineError::Configuration(
                "buildup_window must be >= 6".into(),
            ));
        }
        Ok(())
    }
}

/// Signal fusion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    #[serde(default)]
    pub mode: FusionMode,
    /// Combined confidence needed before recommending action (0-100)
    #[serde(default = "default_action_threshold")]
    pub action_confidence_threshold: f64,
    /// Burst probability needed to act when the ensemble produced no signal
    #[serde(default = "default_fallback_burst")]
    pub fallback_burst_threshold: f64,
    /// Burst probability at which hybrid mode hands the target to the rules
    #[serde(default = "default_burst_override")]
    pub burst_override_threshold: f64,
    /// Ensemble share of the blended confidence in hybrid mode
    #[serde(default = "default_ensemble_confidence_weight")]
    pub ensemble_confidence_weight: f64,
    /// Combined confidence at or above this qualifies for LOW risk
    #[serde(default = "default_low_risk_confidence")]
    pub low_risk_confidence: f64,
    /// Inter-estimator coefficient of variation above this forces HIGH risk
    #[serde(default = "default_dispersion_high_risk")]
    pub dispersion_high_risk: f64,
}

fn default_action_threshold() -> f64 {
    60.0
}

fn default_fallback_burst() -> f64 {
    0.75
}

fn default_burst_override() -> f64 {
    0.7
}

fn default_ensemble_confidence_weight() -> f64 {
    0.6
}

fn default_low_risk_confidence() -> f64 {
    80.0
}

fn default_dispersion_high_risk() -> f64 {
    0.5
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            mode: FusionMode::default(),
            action_confidence_threshold: default_action_threshold(),
            fallback_burst_threshold: default_fallback_burst(),
            burst_override_threshold: default_burst_override(),
            ensemble_confidence_weight: default_ensemble_confidence_weight(),
            low_risk_confidence: default_low_risk_confidence(),
            dispersion_high_risk: default_dispersion_high_risk(),
        }
    }
}

impl FusionConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.action_confidence_threshold) {
            return Err(EngineError::Configuration(
                "action_confidence_threshold must be in [0, 100]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.fallback_burst_threshold) {
            return Err(EngineError::Configuration(
                "fallback_burst_threshold must be in [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.ensemble_confidence_weight) {
            return Err(EngineError::Configuration(
                "ensemble_confidence_weight must be in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// Validation / grading configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Relative band within which a prediction counts as a hit
    #[serde(default = "default_tolerance_pct")]
    pub tolerance_pct: f64,
    /// Graded decisions retained for the rolling decision hit-rate
    #[serde(default = "default_decision_window")]
    pub decision_window: usize,
    /// Relative hit-rate change separating IMPROVING/DEGRADING from STABLE
    #[serde(default = "default_decision_trend_threshold")]
    pub trend_threshold_pct: f64,
}

fn default_tolerance_pct() -> f64 {
    0.15
}

fn default_decision_window() -> usize {
    100
}

fn default_decision_trend_threshold() -> f64 {
    0.10
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            tolerance_pct: default_tolerance_pct(),
            decision_window: default_decision_window(),
            trend_threshold_pct: default_decision_trend_threshold(),
        }
    }
}

impl ValidationConfig {
    fn validate(&self) -> Result<()> {
        if self.tolerance_pct <= 0.0 || self.tolerance_pct >= 1.0 {
            return Err(EngineError::Configuration(
                "tolerance_pct must be in (0, 1)".into(),
            ));
        }
        if self.decision_window < 3 {
            return Err(EngineError::Configuration(
                "decision_window must be >= 3".into(),
            ));
        }
        Ok(())
    }
}
