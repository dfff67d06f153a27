//! Rule catalog
//!
//! Ordered list of independent pattern rules. Catalog order is part of the
//! engine's contract: it decides phase priority and must not be reordered
//! without revisiting every downstream consumer of `fired_rules`.

use super::{Phase, Rule, RuleContext, RuleContribution};

pub(crate) fn build_catalog() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(LowSeries),
        Box::new(NoHighGap),
        Box::new(PostHighEcho),
        Box::new(MassiveGap),
        Box::new(ClusterSeries),
        Box::new(SeriesDirection),
        Box::new(DelayedSpike),
        Box::new(ConfidenceBuilder),
    ]
}

fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// R1: a run of consecutive low outcomes suggests pressure is building
struct LowSeries;

impl Rule for LowSeries {
    fn id(&self) -> &'static str {
        "R1"
    }

    fn evaluate(&self, ctx: &RuleContext) -> Option<RuleContribution> {
        let low = ctx.config.low_multiplier;
        let run = ctx
            .window
            .iter()
            .rev()
            .take_while(|v| **v < low)
            .count();
        if run < ctx.config.low_series_len {
            return None;
        }
        Some(RuleContribution {
            burst_delta: 0.15,
            phase_hint: Some(Phase::Building),
            target_hint: None,
            detail: format!("{run} consecutive outcomes below {low}"),
        })
    }
}

/// R2: the longer since the last high outcome, the more overdue one is
struct NoHighGap;

impl Rule for NoHighGap {
    fn id(&self) -> &'static str {
        "R2"
    }

    fn evaluate(&self, ctx: &RuleContext) -> Option<RuleContribution> {
        let high = ctx.config.gap_multiplier;
        let gap = ctx
            .window
            .iter()
            .rev()
            .take_while(|v| **v < high)
            .count();
        if gap < ctx.config.gap_window {
            return None;
        }
        let ratio = gap as f64 / ctx.config.gap_window as f64;
        Some(RuleContribution {
            burst_delta: (0.175 * ratio).min(0.35),
            phase_hint: None,
            target_hint: None,
            detail: format!("no {high}x+ outcome in the last {gap} rounds"),
        })
    }
}

/// R3: a fresh spike tends to be followed by quiet rounds, not another spike
struct PostHighEcho;

impl Rule for PostHighEcho {
    fn id(&self) -> &'static str {
        "R3"
    }

    fn evaluate(&self, ctx: &RuleContext) -> Option<RuleContribution> {
        let spike = ctx.config.spike_multiplier;
        let lookback = ctx.config.echo_window.min(ctx.window.len());
        let recent = &ctx.window[ctx.window.len() - lookback..];
        let hit = recent.iter().rev().position(|v| *v >= spike)?;
        Some(RuleContribution {
            burst_delta: -0.2,
            phase_hint: Some(Phase::Building),
            target_hint: None,
            detail: format!("{spike}x+ outcome {hit} rounds ago, echo suppression"),
        })
    }
}

/// R5: extreme variance in the trailing window makes any burst read untrustworthy
struct MassiveGap;

impl Rule for MassiveGap {
    fn id(&self) -> &'static str {
        "R5"
    }

    fn evaluate(&self, ctx: &RuleContext) -> Option<RuleContribution> {
        let std = sample_std(ctx.window);
        if std <= ctx.config.volatility_std_threshold {
            return None;
        }
        Some(RuleContribution {
            burst_delta: 0.0,
            phase_hint: None,
            target_hint: None,
            detail: format!("trailing std-dev {std:.2} above volatility threshold"),
        })
    }
}

/// R6: near-identical outcomes clustering in a narrow band read as a lull
struct ClusterSeries;

impl Rule for ClusterSeries {
    fn id(&self) -> &'static str {
        "R6"
    }

    fn evaluate(&self, ctx: &RuleContext) -> Option<RuleContribution> {
        let band = ctx.config.cluster_band_pct;
        let mut run_min = f64::MAX;
        let mut run_max = f64::MIN;
        let mut run = 0usize;
        for v in ctx.window.iter().rev() {
            let next_min = run_min.min(*v);
            let next_max = run_max.max(*v);
            let mid = (next_min + next_max) / 2.0;
            if next_max - next_min > band * mid {
                break;
            }
            run_min = next_min;
            run_max = next_max;
            run += 1;
        }
        if run < ctx.config.cluster_len {
            return None;
        }
        Some(RuleContribution {
            burst_delta: -0.1,
            phase_hint: Some(Phase::CoolDown),
            target_hint: None,
            detail: format!("{run} outcomes clustered within {:.0}% band", band * 100.0),
        })
    }
}

/// R7: a strictly monotonic tail informs the target direction
struct SeriesDirection;

impl Rule for SeriesDirection {
    fn id(&self) -> &'static str {
        "R7"
    }

    fn evaluate(&self, ctx: &RuleContext) -> Option<RuleContribution> {
        let n = ctx.config.direction_window;
        if ctx.window.len() < n || n < 2 {
            return None;
        }
        let tail = &ctx.window[ctx.window.len() - n..];
        let increasing = tail.windows(2).all(|w| w[1] > w[0]);
        let decreasing = tail.windows(2).all(|w| w[1] < w[0]);
        if !increasing && !decreasing {
            return None;
        }
        let step = (tail[n - 1] - tail[0]) / (n - 1) as f64;
        let extrapolated = (tail[n - 1] + step).max(1.0);
        Some(RuleContribution {
            burst_delta: if increasing { 0.05 } else { 0.0 },
            phase_hint: None,
            target_hint: Some(extrapolated),
            detail: format!(
                "{} tail over {n} rounds, extrapolates to {extrapolated:.2}",
                if increasing { "rising" } else { "falling" }
            ),
        })
    }
}

/// R8: rising minimums across consecutive chunks precede historical spikes
struct DelayedSpike;

impl Rule for DelayedSpike {
    fn id(&self) -> &'static str {
        "R8"
    }

    fn evaluate(&self, ctx: &RuleContext) -> Option<RuleContribution> {
        let span = ctx.config.buildup_window;
        if ctx.window.len() < span {
            return None;
        }
        let chunk = span / 3;
        if chunk == 0 {
            return None;
        }
        let tail = &ctx.window[ctx.window.len() - chunk * 3..];
        let min_of = |slice: &[f64]| slice.iter().copied().fold(f64::MAX, f64::min);
        let m1 = min_of(&tail[..chunk]);
        let m2 = min_of(&tail[chunk..chunk * 2]);
        let m3 = min_of(&tail[chunk * 2..]);
        if !(m1 < m2 && m2 < m3) {
            return None;
        }
        Some(RuleContribution {
            burst_delta: 0.2,
            phase_hint: None,
            target_hint: None,
            detail: format!("rising minimums {m1:.2} -> {m2:.2} -> {m3:.2}"),
        })
    }
}

/// R10: consensus bonus when several independent rules agree
struct ConfidenceBuilder;

impl Rule for ConfidenceBuilder {
    fn id(&self) -> &'static str {
        "R10"
    }

    fn evaluate(&self, ctx: &RuleContext) -> Option<RuleContribution> {
        let count = ctx.fired.len();
        if count < 2 {
            return None;
        }
        Some(RuleContribution {
            burst_delta: (0.05 * count as f64).min(0.2),
            phase_hint: None,
            target_hint: None,
            detail: format!("consensus bonus from {count} fired rules"),
        })
    }
}
