//! End-to-end engine tests

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::{EngineConfig, EnsembleConfig};
    use crate::engine::PredictionEngine;
    use crate::error::Result;
    use crate::estimator::{
        Estimator, EstimatorPrediction, MomentumEstimator, MovingAverageEstimator,
        QuantileEstimator,
    };
    use crate::fusion::RiskLevel;

    mockall::mock! {
        pub Scripted {}

        #[async_trait]
        impl Estimator for Scripted {
            fn id(&self) -> &str;
            async fn fit(&self, history: &[f64]) -> Result<()>;
            async fn predict(&self, window: &[f64]) -> Result<EstimatorPrediction>;
        }
    }

    /// Estimator that always outlives the per-estimator timeout
    struct SlowEstimator;

    #[async_trait]
    impl Estimator for SlowEstimator {
        fn id(&self) -> &str {
            "slow"
        }

        async fn predict(&self, _window: &[f64]) -> Result<EstimatorPrediction> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(EstimatorPrediction {
                estimator_id: "slow".to_string(),
                value: 2.0,
                confidence: 0.9,
                range: None,
            })
        }
    }

    fn default_pool(engine: &mut PredictionEngine) {
        engine
            .register_estimator(Arc::new(MovingAverageEstimator::new("moving_average", 10)))
            .unwrap();
        engine
            .register_estimator(Arc::new(MomentumEstimator::new("momentum", 8)))
            .unwrap();
        engine
            .register_estimator(Arc::new(QuantileEstimator::new("median_quantile", 0.5)))
            .unwrap();
    }

    async fn feed(engine: &mut PredictionEngine, values: &[f64]) {
        for (i, v) in values.iter().enumerate() {
            engine
                .submit_outcome(*v, &format!("round-{i}"), Utc::now())
                .await
                .unwrap();
        }
    }

    /// Quiet multiplier stream with the occasional spike
    fn game_stream(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| match i % 17 {
                16 => 12.5,
                7 => 4.2,
                k => 1.1 + (k as f64) * 0.12,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_full_loop_produces_decisions_and_records() {
        let mut engine = PredictionEngine::new(EngineConfig::default()).unwrap();
        default_pool(&mut engine);

        feed(&mut engine, &game_stream(60)).await;

        let decision = engine.get_decision().unwrap();
        assert!(decision.window_len <= 50);
        assert!(decision.target >= 1.01);
        assert!((0.0..=100.0).contains(&decision.confidence));
        assert!(decision.rationale.len() >= 4);

        let record = engine.get_validation_record().unwrap();
        assert_eq!(record.estimator_grades.len(), 3);
        assert!((0.0..=1.0).contains(&record.decision_hit_rate));

        let snapshot = engine.accuracy_snapshot();
        assert_eq!(snapshot.len(), 3);
        // The first couple of rounds are too short for some estimators,
        // everything after that grades every cycle
        for acc in &snapshot {
            assert!(acc.graded >= 57);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_straggler_discarded_by_timeout() {
        let config = EngineConfig {
            ensemble: EnsembleConfig {
                per_estimator_timeout_ms: 100,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut engine = PredictionEngine::new(config).unwrap();
        engine.register_estimator(Arc::new(SlowEstimator)).unwrap();
        engine
            .register_estimator(Arc::new(MovingAverageEstimator::new("moving_average", 10)))
            .unwrap();

        feed(&mut engine, &game_stream(15)).await;

        let decision = engine.get_decision().unwrap();
        // The slow estimator never contributes
        assert!(decision
            .rationale
            .iter()
            .any(|r| r.contains("active estimators: 1/2")));

        // And never gets graded
        let snapshot = engine.accuracy_snapshot();
        assert!(snapshot.iter().all(|a| a.estimator_id != "slow"));
    }

    #[tokio::test]
    async fn test_degraded_mode_with_partial_failures() {
        let mut engine = PredictionEngine::new(EngineConfig::default()).unwrap();

        let mut flaky = MockScripted::new();
        flaky.expect_id().return_const("flaky".to_string());
        flaky.expect_fit().returning(|_| Ok(()));
        flaky.expect_predict().returning(|_| {
            Err(crate::error::EngineError::EstimatorFailure {
                id: "flaky".to_string(),
                reason: "model file corrupt".to_string(),
            })
        });

        engine.register_estimator(Arc::new(flaky)).unwrap();
        engine
            .register_estimator(Arc::new(MovingAverageEstimator::new("moving_average", 10)))
            .unwrap();

        feed(&mut engine, &game_stream(20)).await;

        let decision = engine.get_decision().unwrap();
        assert!(decision
            .rationale
            .iter()
            .any(|r| r.contains("active estimators: 1/2")));

        let record = engine.get_validation_record().unwrap();
        assert_eq!(record.estimator_grades.len(), 1);
        assert_eq!(record.estimator_grades[0].estimator_id, "moving_average");
    }

    #[tokio::test]
    async fn test_accuracy_shifts_weight_to_better_estimator() {
        let mut engine = PredictionEngine::new(EngineConfig::default()).unwrap();

        let mut sharp = MockScripted::new();
        sharp.expect_id().return_const("sharp".to_string());
        sharp.expect_fit().returning(|_| Ok(()));
        sharp.expect_predict().returning(|window| {
            // Tracks the stream closely
            let last = window.last().copied().unwrap_or(1.5);
            Ok(EstimatorPrediction {
                estimator_id: "sharp".to_string(),
                value: last,
                confidence: 0.9,
                range: None,
            })
        });

        let mut wild = MockScripted::new();
        wild.expect_id().return_const("wild".to_string());
        wild.expect_fit().returning(|_| Ok(()));
        wild.expect_predict().returning(|_| {
            Ok(EstimatorPrediction {
                estimator_id: "wild".to_string(),
                value: 9.5,
                confidence: 0.9,
                range: None,
            })
        });

        engine.register_estimator(Arc::new(sharp)).unwrap();
        engine.register_estimator(Arc::new(wild)).unwrap();

        // A flat stream the sharp estimator nails every round
        let values = vec![1.6; 40];
        feed(&mut engine, &values).await;

        let snapshot = engine.accuracy_snapshot();
        let weight_of = |id: &str| {
            snapshot
                .iter()
                .find(|a| a.estimator_id == id)
                .map(|a| a.weight)
                .unwrap()
        };
        assert!(weight_of("sharp") > weight_of("wild"));

        let sharp_hit = snapshot
            .iter()
            .find(|a| a.estimator_id == "sharp")
            .and_then(|a| a.hit_rate)
            .unwrap();
        assert!(sharp_hit > 0.9);
    }

    #[tokio::test]
    async fn test_volatile_stream_is_high_risk() {
        let mut engine = PredictionEngine::new(EngineConfig::default()).unwrap();
        default_pool(&mut engine);

        // Wild swings trip the variance rule
        let values: Vec<f64> = (0..30)
            .map(|i| if i % 2 == 0 { 1.1 } else { 48.0 })
            .collect();
        feed(&mut engine, &values).await;

        let decision = engine.get_decision().unwrap();
        assert_eq!(decision.risk, RiskLevel::High);
    }

    #[tokio::test]
    async fn test_window_len_never_exceeds_configured_size() {
        let config = EngineConfig {
            window_size: 20,
            ..Default::default()
        };
        let mut engine = PredictionEngine::new(config).unwrap();
        default_pool(&mut engine);

        feed(&mut engine, &game_stream(80)).await;

        let decision = engine.get_decision().unwrap();
        assert_eq!(decision.window_len, 20);
        assert_eq!(engine.history_len(), 80);
    }
}
