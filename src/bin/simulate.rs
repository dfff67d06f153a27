//! Dry-run simulation - drives the engine over a synthetic round stream

use chrono::Utc;
use clap::Parser;
use crash_predictor::config::EngineConfig;
use crash_predictor::engine::PredictionEngine;
use crash_predictor::estimator::{MomentumEstimator, MovingAverageEstimator, QuantileEstimator};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "simulate")]
#[command(about = "Feed synthetic crash rounds through the prediction engine")]
struct Cli {
    /// Number of rounds to simulate
    #[arg(short, long, default_value = "500")]
    rounds: usize,

    /// RNG seed for a reproducible stream
    #[arg(short, long)]
    seed: Option<u64>,

    /// Config file path (TOML); defaults apply when omitted
    #[arg(short, long)]
    config: Option<String>,

    /// House edge of the synthetic generator
    #[arg(long, default_value = "0.04")]
    house_edge: f64,

    /// Dump the final accuracy snapshot as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    let mut engine = PredictionEngine::new(config)?;
    engine.register_estimator(Arc::new(MovingAverageEstimator::new("moving_average", 10)))?;
    engine.register_estimator(Arc::new(MomentumEstimator::new("momentum", 8)))?;
    engine.register_estimator(Arc::new(QuantileEstimator::new("median_quantile", 0.5)))?;

    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    info!(rounds = cli.rounds, house_edge = cli.house_edge, "simulation start");

    let mut acted = 0usize;
    let mut wins = 0usize;
    let mut armed: Option<f64> = None; // target from the previous decision

    for i in 0..cli.rounds {
        let value = sample_multiplier(&mut rng, cli.house_edge);

        // Settle the previous recommendation against this round
        if let Some(target) = armed.take() {
            acted += 1;
            if value >= target {
                wins += 1;
            }
        }

        let round_id = Uuid::new_v4().to_string();
        if let Err(e) = engine.submit_outcome(value, &round_id, Utc::now()).await {
            warn!(round = i, error = %e, "outcome rejected");
            continue;
        }

        if let Some(decision) = engine.get_decision() {
            if decision.should_act {
                armed = Some(decision.target);
            }
            if i % 50 == 0 {
                info!(
                    round = i,
                    value = format!("{value:.2}"),
                    phase = decision.phase.as_str(),
                    act = decision.should_act,
                    target = format!("{:.2}", decision.target),
                    confidence = format!("{:.0}", decision.confidence),
                    "progress"
                );
            }
        }
    }

    let hit_rate = engine.decision_hit_rate();
    info!(
        rounds = cli.rounds,
        recommendations_taken = acted,
        wins,
        win_rate = format!(
            "{:.1}%",
            if acted > 0 { wins as f64 / acted as f64 * 100.0 } else { 0.0 }
        ),
        decision_hit_rate = format!("{:.1}%", hit_rate * 100.0),
        "simulation complete"
    );

    for acc in engine.accuracy_snapshot() {
        info!(
            estimator = %acc.estimator_id,
            graded = acc.graded,
            mae = acc.mae.map(|m| format!("{m:.3}")).unwrap_or_else(|| "-".into()),
            hit_rate = acc.hit_rate.map(|h| format!("{h:.2}")).unwrap_or_else(|| "-".into()),
            weight = format!("{:.3}", acc.weight),
            trend = ?acc.trend,
            "estimator accuracy"
        );
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&engine.accuracy_snapshot())?);
    }

    Ok(())
}

/// Inverse-CDF sampler for the classic crash distribution: heavy tail,
/// median just above 1.9x at a 4% edge
fn sample_multiplier(rng: &mut StdRng, house_edge: f64) -> f64 {
    let u: f64 = rng.random();
    let raw = (1.0 - house_edge) / (1.0 - u).max(1e-9);
    raw.clamp(1.0, 1_000.0)
}
