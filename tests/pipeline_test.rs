//! End-to-end training and serving over synthetic minute candles.

use chrono::Utc;
use foresight::services::features::FeatureSet;
use foresight::services::registry::ArtifactStore;
use foresight::services::{ForecastService, LoadedModel, PredictorKind};
use foresight::sources::StaticSource;
use foresight::{Candle, Config, EnsembleStrategy, Horizon, Hyperparameters};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Upward linear trend (0.05 per minute) plus small seeded noise, ending a
/// minute before now.
fn trending_candles(n: usize) -> Vec<Candle> {
    let mut rng = StdRng::seed_from_u64(7);
    let start = Utc::now().timestamp_millis() - (n as i64 + 1) * 60_000;
    let mut prev = 100.0;
    (0..n)
        .map(|i| {
            let close = 100.0 + 0.05 * i as f64 + rng.gen_range(-0.15..0.15);
            let open = prev;
            prev = close;
            Candle::new(
                start + i as i64 * 60_000,
                open,
                open.max(close) + 0.05,
                open.min(close) - 0.05,
                close,
                1000.0 + rng.gen_range(0.0..500.0),
            )
        })
        .collect()
}

fn service(dir: &Path) -> ForecastService {
    let config = Config {
        model_dir: dir.to_path_buf(),
        ..Config::default()
    };
    let source = StaticSource::new().with_candles("BTCUSDT", trending_candles(2000));
    ForecastService::from_config(Arc::new(source), &config).unwrap()
}

fn small(kind: PredictorKind) -> Hyperparameters {
    Hyperparameters {
        model_type: kind,
        sequence_length: 10,
        hidden_size: 4,
        epochs: 8,
        early_stopping_patience: 3,
        feature_set: FeatureSet::Price,
        ..Hyperparameters::default()
    }
}

#[tokio::test]
async fn test_trend_is_learned_and_served() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());

    let outcome = service.train("BTCUSDT", small(PredictorKind::Linear)).await.unwrap();
    assert!(
        outcome.metrics.directional_accuracy > 50.0,
        "directional accuracy {}",
        outcome.metrics.directional_accuracy
    );
    assert!(outcome.metrics.mae.is_finite());
    assert!(outcome.test_windows > 0);
    assert_eq!(service.list_models().unwrap().len(), 1);

    let forecast = service
        .predict("BTCUSDT", Horizon::parse("15m").unwrap(), 0.95)
        .await
        .unwrap();
    assert_eq!(forecast.path.len(), 15);
    assert!(forecast.path.iter().all(|p| p.price.is_finite()));
    assert!(forecast.lower_bound < forecast.predicted_price);
    assert!(forecast.predicted_price < forecast.upper_bound);
    // a 15 minute forecast on a smooth trend stays near the last price
    assert!((forecast.predicted_price / forecast.current_price - 1.0).abs() < 0.05);
}

#[tokio::test]
async fn test_ensemble_over_two_models() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    service.train("BTCUSDT", small(PredictorKind::Linear)).await.unwrap();
    service.train("BTCUSDT", small(PredictorKind::Mlp)).await.unwrap();

    let stats = service.model_stats("BTCUSDT").unwrap();
    assert_eq!(stats.model_count, 2);
    assert!(stats.best_model.is_some());

    for strategy in [EnsembleStrategy::WeightedAverage, EnsembleStrategy::Voting] {
        let forecast = service
            .predict_ensemble("BTCUSDT", Horizon::parse("5m").unwrap(), strategy)
            .await
            .unwrap();
        assert_eq!(forecast.result.models_used, 2);
        assert!(forecast.result.failures.is_empty());
        assert!((0.0..=1.0).contains(&forecast.result.confidence));
        assert!(forecast.lower_bound <= forecast.result.predicted_price);
    }

    assert_eq!(service.delete_models("BTCUSDT").unwrap(), 2);
    assert!(service.list_models().unwrap().is_empty());
}

#[tokio::test]
async fn test_reloaded_artifact_predicts_identically() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    service.train("BTCUSDT", small(PredictorKind::Mlp)).await.unwrap();

    let candles = trending_candles(2000);
    let cached = service.store().load("BTCUSDT", PredictorKind::Mlp).unwrap();
    let fresh_store = ArtifactStore::new(dir.path(), Duration::from_secs(60), 2).unwrap();
    let reloaded = fresh_store.load("BTCUSDT", PredictorKind::Mlp).unwrap();
    assert_eq!(cached.metadata.feature_columns, reloaded.metadata.feature_columns);

    let a = LoadedModel::from_artifact(cached).unwrap().predict_price(&candles).unwrap();
    let b = LoadedModel::from_artifact(reloaded).unwrap().predict_price(&candles).unwrap();
    assert!((a - b).abs() < 1e-9 * a.abs().max(1.0), "{} vs {}", a, b);
}

#[tokio::test]
async fn test_unknown_symbol_has_no_history() {
    let dir = tempfile::tempdir().unwrap();
    let err = service(dir.path())
        .train("ETHUSDT", small(PredictorKind::Linear))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        foresight::ForecastError::Data {
            stage: foresight::Stage::Fetch,
            ..
        }
    ));
}
