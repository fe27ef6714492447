//! End-to-end training and serving for one symbol at a time.
//!
//! Training: fetch candles, compute features, window them, fit both scalers on
//! the training partition, train, evaluate on the held-out tail, publish.
//! Serving: load artifacts, fetch recent candles, walk a [`ForecastPath`] or
//! run the ensemble.

use chrono::{DateTime, Utc};
use ndarray::{s, Array2};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ForecastError, Result, Stage};
use crate::services::ensemble::EnsembleCombiner;
use crate::services::evaluator::Evaluator;
use crate::services::features::FeatureEngine;
use crate::services::forecast::{recent_volatility, LoadedModel};
use crate::services::predictor::{build_predictor, PredictorKind, PredictorSpec, PredictorState};
use crate::services::registry::{normalize_symbol, ArtifactStore, ModelArtifact, ModelSummary};
use crate::services::scaler::Scaler;
use crate::services::trainer::{
    CheckpointSink, FileCheckpoint, StopReason, TrainingConfig, TrainingController,
};
use crate::services::windows::{chronological_split, split_sizes, WindowBuilder, TRAIN_FRACTION, VALIDATION_FRACTION};
use crate::sources::CandleSource;
use crate::types::{
    Candle, EnsembleResult, EnsembleStrategy, ForecastPoint, Horizon, Hyperparameters, Metrics,
    ModelMetadata, TargetKind, Timeframe, ARTIFACT_VERSION,
};

/// Share of price used per unit of ensemble disagreement for its bounds.
const ENSEMBLE_BAND: f64 = 0.05;

/// Summary of a finished training run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainOutcome {
    pub symbol: String,
    pub model_type: PredictorKind,
    pub run_id: Uuid,
    pub model_path: String,
    pub training_time_secs: f64,
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub stop_reason: StopReason,
    pub metrics: Metrics,
    pub feature_count: usize,
    pub train_windows: usize,
    pub validation_windows: usize,
    pub test_windows: usize,
}

/// Latest values of a few indicators, for context next to a forecast.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorSnapshot {
    pub rsi_14: Option<f64>,
    pub macd: Option<f64>,
    pub ema_20: Option<f64>,
    pub ema_50: Option<f64>,
}

impl IndicatorSnapshot {
    /// Indicator values at the newest candle; undefined ones are `None`.
    fn at_newest(symbol: &str, candles: &[Candle]) -> Self {
        let newest = candles.last().map(|c| c.timestamp);
        match FeatureEngine::compute_features(symbol, candles, &[]) {
            Ok(frame) if frame.timestamps.last().copied() == newest => Self {
                rsi_14: frame.last_value("rsi_14"),
                macd: frame.last_value("macd"),
                ema_20: frame.last_value("ema_20"),
                ema_50: frame.last_value("ema_50"),
            },
            Ok(_) => Self::default(),
            Err(e) => {
                debug!("{}: indicator snapshot unavailable: {}", symbol, e);
                Self::default()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub model_type: PredictorKind,
    pub version: String,
    pub trained_at: DateTime<Utc>,
    pub sequence_length: usize,
    pub horizon_steps: usize,
    pub metrics: Option<Metrics>,
}

impl ModelInfo {
    fn from_metadata(meta: &ModelMetadata) -> Self {
        Self {
            model_type: meta.model_type,
            version: meta.version.clone(),
            trained_at: meta.trained_at,
            sequence_length: meta.sequence_length,
            horizon_steps: meta.horizon_steps,
            metrics: meta.metrics,
        }
    }
}

/// Single-model forecast.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    pub symbol: String,
    pub horizon: Horizon,
    pub confidence: f64,
    pub current_price: f64,
    pub predicted_price: f64,
    pub price_change: f64,
    pub price_change_percent: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub volatility: f64,
    pub path: Vec<ForecastPoint>,
    pub indicators: IndicatorSnapshot,
    pub model: ModelInfo,
    pub generated_at: DateTime<Utc>,
}

/// Ensemble forecast with its price band.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsembleForecast {
    pub symbol: String,
    pub horizon: Horizon,
    pub current_price: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    #[serde(flatten)]
    pub result: EnsembleResult,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStats {
    pub symbol: String,
    pub model_count: usize,
    pub best_model: Option<PredictorKind>,
    pub average_directional_accuracy: Option<f64>,
    pub models: Vec<ModelSummary>,
}

/// Reject hyperparameters no run could succeed with.
pub fn validate_hyperparameters(hp: &Hyperparameters) -> Result<()> {
    let positive = [
        ("sequence_length", hp.sequence_length),
        ("horizon_steps", hp.horizon_steps),
        ("hidden_size", hp.hidden_size),
        ("batch_size", hp.batch_size),
        ("epochs", hp.epochs),
        ("lookback_days", hp.lookback_days as usize),
    ];
    if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
        return Err(ForecastError::BadRequest(format!("{} must be positive", name)));
    }
    if !(hp.learning_rate.is_finite() && hp.learning_rate > 0.0) {
        return Err(ForecastError::BadRequest("learning_rate must be positive".to_string()));
    }
    if !(hp.weight_decay.is_finite() && hp.weight_decay >= 0.0) {
        return Err(ForecastError::BadRequest("weight_decay must be non-negative".to_string()));
    }
    Ok(())
}

/// `closes[j] / closes[j - horizon] - 1` per row; NaN for the first `horizon`.
///
/// Rows are frame rows. Only windows whose rows and target are consecutive
/// candles use these, so row `j - horizon` is exactly `horizon` candles back.
pub fn forward_returns(closes: &[f64], horizon: usize) -> Vec<f64> {
    (0..closes.len())
        .map(|j| {
            if j < horizon || closes[j - horizon] == 0.0 {
                f64::NAN
            } else {
                closes[j] / closes[j - horizon] - 1.0
            }
        })
        .collect()
}

/// Train one model on `candles` and publish it to `store`.
///
/// Blocking; run on a worker thread. When `checkpoint_dir` is set the best
/// parameters so far are kept on disk while training runs.
pub fn train_on_candles(
    symbol: &str,
    candles: &[Candle],
    hp: &Hyperparameters,
    timeframe: Timeframe,
    min_candles: usize,
    store: &ArtifactStore,
    checkpoint_dir: Option<&Path>,
) -> Result<TrainOutcome> {
    validate_hyperparameters(hp)?;
    if candles.len() < min_candles {
        return Err(ForecastError::data(
            symbol,
            Stage::Fetch,
            format!("{} candles, need at least {}", candles.len(), min_candles),
        ));
    }

    let (seq_len, horizon) = (hp.sequence_length, hp.horizon_steps);
    let columns = hp.feature_set.columns(&FeatureEngine::column_names());
    if columns.is_empty() {
        return Err(ForecastError::BadRequest("feature set selects no columns".to_string()));
    }
    let frame = FeatureEngine::compute_features(symbol, candles, &columns)?;
    let features = frame.select(symbol, &columns)?;
    let targets = forward_returns(&frame.closes, horizon);

    let builder = WindowBuilder::new(seq_len, horizon).map_err(|e| e.at(symbol))?;
    let starts = builder.consecutive_starts(&frame.timestamps, timeframe.millis());
    let skipped = builder.window_count(frame.len()) - starts.len();
    if skipped > 0 {
        debug!("{}: {} windows straddle missing feature rows and are skipped", symbol, skipped);
    }
    let (n_train, n_val, n_test) = split_sizes(starts.len(), TRAIN_FRACTION, VALIDATION_FRACTION);
    if n_train == 0 || n_val == 0 || n_test == 0 {
        return Err(ForecastError::insufficient(
            symbol,
            Stage::Windowing,
            format!(
                "{} feature rows give {}/{}/{} windows for sequence length {}",
                frame.len(),
                n_train,
                n_val,
                n_test,
                seq_len
            ),
        ));
    }

    // both scalers see only rows up to the last training window
    let train_rows = starts[n_train - 1] + seq_len;
    let mut input_scaler = Scaler::new(hp.normalization);
    input_scaler
        .fit(features.slice(s![..train_rows, ..]))
        .map_err(|e| e.at(symbol, Stage::Scaling))?;
    let train_targets = Array2::from_shape_fn((n_train, 1), |(i, _)| targets[starts[i] + seq_len + horizon - 1]);
    let mut target_scaler = Scaler::new(hp.normalization);
    target_scaler
        .fit(train_targets.view())
        .map_err(|e| e.at(symbol, Stage::Scaling))?;

    let scaled = input_scaler
        .transform(features.view())
        .map_err(|e| e.at(symbol, Stage::Scaling))?;
    let mut scaled_targets = Vec::with_capacity(targets.len());
    for t in &targets {
        scaled_targets.push(if t.is_finite() {
            target_scaler
                .transform_value(*t)
                .map_err(|e| e.at(symbol, Stage::Scaling))?
        } else {
            *t
        });
    }
    let windows = builder
        .build_at(scaled, &scaled_targets, starts)
        .map_err(|e| e.at(symbol))?;
    let split = chronological_split(&windows, TRAIN_FRACTION, VALIDATION_FRACTION);
    info!(
        "{}: training {} on {} columns, {}/{}/{} windows",
        symbol,
        hp.model_type,
        columns.len(),
        split.train.len(),
        split.validation.len(),
        split.test.len()
    );

    let spec = PredictorSpec {
        sequence_length: seq_len,
        n_features: columns.len(),
        hidden_size: hp.hidden_size,
        seed: hp.seed,
    };
    let mut predictor = build_predictor(hp.model_type, spec);
    let controller = TrainingController::new(TrainingConfig::from_hyperparameters(hp));
    let run_id = Uuid::new_v4();

    let checkpoint_path = checkpoint_dir
        .map(|dir| dir.join(format!(".checkpoint-{}-{}-{}.json", symbol, hp.model_type, run_id)));
    let mut checkpoint = checkpoint_path.clone().map(FileCheckpoint::new);
    let trained = controller.train(
        predictor.as_mut(),
        &split.train,
        &split.validation,
        checkpoint.as_mut().map(|c| c as &mut dyn CheckpointSink),
    );
    if let Some(path) = &checkpoint_path {
        if let Err(e) = fs::remove_file(path) {
            debug!("no checkpoint to remove at {}: {}", path.display(), e);
        }
    }
    let history = trained.map_err(|e| e.at(symbol))?;

    let test = &split.test;
    let mut predicted = Vec::with_capacity(test.len());
    let mut actual = Vec::with_capacity(test.len());
    let mut reference = Vec::with_capacity(test.len());
    for i in 0..test.len() {
        let raw = predictor
            .infer(test.window(i))
            .map_err(|e| e.at(symbol, Stage::Evaluation))?;
        let ret = target_scaler
            .inverse_value(raw)
            .map_err(|e| e.at(symbol, Stage::Evaluation))?;
        let base = frame.closes[test.last_row(i)];
        predicted.push(base * (1.0 + ret));
        actual.push(frame.closes[test.target_row(i)]);
        reference.push(base);
    }
    let metrics = Evaluator::evaluate_forecasts(&predicted, &actual, &reference).map_err(|e| e.at(symbol))?;
    info!(
        "{}: {} test MAE {:.6}, RMSE {:.6}, direction {:.1}%",
        symbol, hp.model_type, metrics.mae, metrics.rmse, metrics.directional_accuracy
    );

    let artifact = ModelArtifact {
        predictor: PredictorState::capture(predictor.as_ref(), spec),
        input_scaler,
        target_scaler,
        metadata: ModelMetadata {
            symbol: symbol.to_string(),
            model_type: hp.model_type,
            version: ARTIFACT_VERSION.to_string(),
            run_id,
            trained_at: Utc::now(),
            timeframe,
            feature_columns: columns,
            sequence_length: seq_len,
            horizon_steps: horizon,
            target: TargetKind::ForwardReturn,
            hyperparameters: hp.clone(),
            metrics: Some(metrics),
            training: history.clone(),
        },
    };
    let path = store.publish(&artifact)?;

    Ok(TrainOutcome {
        symbol: symbol.to_string(),
        model_type: hp.model_type,
        run_id,
        model_path: path.display().to_string(),
        training_time_secs: history.training_time_secs,
        epochs_run: history.epochs_run,
        best_epoch: history.best_epoch,
        stop_reason: history.stop_reason,
        metrics,
        feature_count: artifact.metadata.feature_columns.len(),
        train_windows: split.train.len(),
        validation_windows: split.validation.len(),
        test_windows: split.test.len(),
    })
}

#[derive(Debug, Clone, Copy)]
struct ServiceSettings {
    timeframe: Timeframe,
    min_training_candles: usize,
    max_forecast_steps: usize,
    inference_lookback_days: u32,
}

/// The operations the HTTP layer exposes.
pub struct ForecastService {
    source: Arc<dyn CandleSource>,
    store: Arc<ArtifactStore>,
    settings: ServiceSettings,
}

impl ForecastService {
    pub fn new(source: Arc<dyn CandleSource>, store: Arc<ArtifactStore>, config: &Config) -> Self {
        Self {
            source,
            store,
            settings: ServiceSettings {
                timeframe: config.timeframe,
                min_training_candles: config.min_training_candles,
                max_forecast_steps: config.max_forecast_steps,
                inference_lookback_days: config.inference_lookback_days,
            },
        }
    }

    /// Service over an artifact store at `config.model_dir`.
    pub fn from_config(source: Arc<dyn CandleSource>, config: &Config) -> Result<Self> {
        let store = ArtifactStore::new(
            &config.model_dir,
            config.model_expiry,
            config.max_models_in_memory,
        )?;
        Ok(Self::new(source, Arc::new(store), config))
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    async fn candles(&self, symbol: &str, days: u32) -> Result<Vec<Candle>> {
        let end = Utc::now();
        let start = end - chrono::Duration::days(days as i64);
        self.source.fetch(symbol, self.settings.timeframe, start, end).await
    }

    fn horizon_candles(&self, horizon: Horizon) -> Result<usize> {
        let steps = horizon.steps(self.settings.timeframe);
        if steps > self.settings.max_forecast_steps {
            return Err(ForecastError::BadRequest(format!(
                "horizon {} covers {} candles, limit is {}",
                horizon, steps, self.settings.max_forecast_steps
            )));
        }
        Ok(steps)
    }

    /// Fetch history and train one model. Publishes on success.
    pub async fn train(&self, symbol: &str, hyperparameters: Hyperparameters) -> Result<TrainOutcome> {
        let symbol = normalize_symbol(symbol)?;
        validate_hyperparameters(&hyperparameters)?;
        let candles = self.candles(&symbol, hyperparameters.lookback_days).await?;
        info!(
            "{}: fetched {} candles from {} for training",
            symbol,
            candles.len(),
            self.source.name()
        );

        let store = Arc::clone(&self.store);
        let settings = self.settings;
        tokio::task::spawn_blocking(move || {
            train_on_candles(
                &symbol,
                &candles,
                &hyperparameters,
                settings.timeframe,
                settings.min_training_candles,
                &store,
                Some(store.root()),
            )
        })
        .await
        .map_err(|e| ForecastError::Internal(format!("training task failed: {}", e)))?
    }

    /// Forecast with the most recently trained model for `symbol`.
    pub async fn predict(&self, symbol: &str, horizon: Horizon, confidence: f64) -> Result<Forecast> {
        let symbol = normalize_symbol(symbol)?;
        if !(confidence > 0.0 && confidence < 1.0) {
            return Err(ForecastError::BadRequest(format!(
                "confidence must be between 0 and 1, got {}",
                confidence
            )));
        }
        let steps = self.horizon_candles(horizon)?;
        let newest = self
            .store
            .list_symbol(&symbol)?
            .into_iter()
            .max_by_key(|m| m.trained_at)
            .ok_or_else(|| ForecastError::NoModelsAvailable { symbol: symbol.clone() })?;
        let artifact = self.store.load(&symbol, newest.model_type)?;
        let candles = self.candles(&symbol, self.settings.inference_lookback_days).await?;

        tokio::task::spawn_blocking(move || forecast_blocking(&symbol, artifact, &candles, horizon, steps, confidence))
            .await
            .map_err(|e| ForecastError::Internal(format!("inference task failed: {}", e)))?
    }

    /// Combine every published model for `symbol`.
    pub async fn predict_ensemble(
        &self,
        symbol: &str,
        horizon: Horizon,
        strategy: EnsembleStrategy,
    ) -> Result<EnsembleForecast> {
        let symbol = normalize_symbol(symbol)?;
        let steps = self.horizon_candles(horizon)?;
        let members = self.store.load_all(&symbol)?;
        if members.is_empty() {
            return Err(ForecastError::NoModelsAvailable { symbol });
        }
        for (kind, loaded) in &members {
            if let Err(e) = loaded {
                warn!("{}: {} artifact failed to load: {}", symbol, kind, e);
            }
        }

        let candles = self.candles(&symbol, self.settings.inference_lookback_days).await?;
        let current_price = candles.last().map(|c| c.close).ok_or_else(|| {
            ForecastError::data(&symbol, Stage::Fetch, "no recent candles")
        })?;

        let result = EnsembleCombiner::new(strategy)
            .predict(&symbol, Arc::new(candles), steps, members)
            .await?;
        let margin = result.predicted_price * (1.0 - result.confidence) * ENSEMBLE_BAND;
        Ok(EnsembleForecast {
            symbol,
            horizon,
            current_price,
            lower_bound: result.predicted_price - margin,
            upper_bound: result.predicted_price + margin,
            result,
            generated_at: Utc::now(),
        })
    }

    pub fn list_models(&self) -> Result<Vec<ModelSummary>> {
        self.store.list_all()
    }

    pub fn model_stats(&self, symbol: &str) -> Result<ModelStats> {
        let symbol = normalize_symbol(symbol)?;
        let models = self.store.list_symbol(&symbol)?;
        if models.is_empty() {
            return Err(ForecastError::NotFound(format!("models for {}", symbol)));
        }

        let accuracies: Vec<(PredictorKind, f64)> = models
            .iter()
            .filter_map(|m| m.metrics.map(|x| (m.model_type, x.directional_accuracy)))
            .collect();
        let best_model = accuracies
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(kind, _)| *kind);
        let average_directional_accuracy = if accuracies.is_empty() {
            None
        } else {
            Some(accuracies.iter().map(|(_, a)| a).sum::<f64>() / accuracies.len() as f64)
        };

        Ok(ModelStats {
            symbol,
            model_count: models.len(),
            best_model,
            average_directional_accuracy,
            models,
        })
    }

    pub fn delete_models(&self, symbol: &str) -> Result<usize> {
        let symbol = normalize_symbol(symbol)?;
        let removed = self.store.delete(&symbol)?;
        if removed == 0 {
            return Err(ForecastError::NotFound(format!("models for {}", symbol)));
        }
        Ok(removed)
    }
}

fn forecast_blocking(
    symbol: &str,
    artifact: Arc<ModelArtifact>,
    candles: &[Candle],
    horizon: Horizon,
    steps: usize,
    confidence: f64,
) -> Result<Forecast> {
    let model = LoadedModel::from_artifact(artifact)?;
    let current_price = candles
        .last()
        .map(|c| c.close)
        .ok_or_else(|| ForecastError::data(symbol, Stage::Fetch, "no recent candles"))?;

    let path: Vec<ForecastPoint> = model.forecast(candles, steps, confidence)?.collect::<Result<_>>()?;
    let last = path
        .last()
        .cloned()
        .ok_or_else(|| ForecastError::Internal("empty forecast path".to_string()))?;

    let tail = &candles[candles.len().saturating_sub(model.context_len())..];
    let indicators = IndicatorSnapshot::at_newest(symbol, tail);

    let price_change = last.price - current_price;
    Ok(Forecast {
        symbol: symbol.to_string(),
        horizon,
        confidence,
        current_price,
        predicted_price: last.price,
        price_change,
        price_change_percent: 100.0 * price_change / current_price,
        lower_bound: last.lower,
        upper_bound: last.upper,
        volatility: recent_volatility(candles, 500),
        path,
        indicators,
        model: ModelInfo::from_metadata(model.metadata()),
        generated_at: Utc::now(),
    })
}
