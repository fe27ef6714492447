//! Inference against a loaded artifact, one step or many.

use std::sync::Arc;

use crate::error::{ForecastError, Result, Stage};
use crate::services::features::FeatureEngine;
use crate::services::predictor::Predictor;
use crate::services::registry::ModelArtifact;
use crate::services::windows::WindowBuilder;
use crate::types::{z_score, Candle, ForecastPoint, ModelMetadata};

/// Extra candles beyond the indicator warm-up so long EMAs settle before the
/// inference window.
const EMA_SETTLE_CANDLES: usize = 600;

/// Observed candles used to estimate return volatility for the bounds.
const VOLATILITY_LOOKBACK: usize = 500;

/// A restored predictor together with the artifact it came from.
pub struct LoadedModel {
    artifact: Arc<ModelArtifact>,
    predictor: Box<dyn Predictor>,
}

impl LoadedModel {
    pub fn from_artifact(artifact: Arc<ModelArtifact>) -> Result<Self> {
        artifact.validate()?;
        let predictor = artifact
            .predictor
            .restore()
            .map_err(|e| e.at(&artifact.metadata.symbol, Stage::Inference))?;
        Ok(Self { artifact, predictor })
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.artifact.metadata
    }

    /// Candles of history the feature window needs.
    pub fn context_len(&self) -> usize {
        FeatureEngine::MIN_HISTORY + EMA_SETTLE_CANDLES + self.metadata().sequence_length
    }

    /// Predicted simple return over the model's horizon from the newest
    /// candle, and that candle's close.
    ///
    /// The window is the newest `sequence_length` candles. When the model's
    /// features are undefined anywhere in it, this fails rather than fall
    /// back to older rows.
    pub fn predict_return(&self, candles: &[Candle]) -> Result<(f64, f64)> {
        let meta = self.metadata();
        let symbol = meta.symbol.as_str();
        let tail = &candles[candles.len().saturating_sub(self.context_len())..];

        let frame = FeatureEngine::compute_features(symbol, tail, &meta.feature_columns)?;
        let matrix = frame.select(symbol, &meta.feature_columns)?;
        let builder = WindowBuilder::new(meta.sequence_length, meta.horizon_steps.max(1))
            .map_err(|e| e.at(symbol))?;
        let window = builder.last_window(matrix.view()).ok_or_else(|| {
            ForecastError::insufficient(
                symbol,
                Stage::Inference,
                format!(
                    "{} complete feature rows, need {}",
                    frame.len(),
                    meta.sequence_length
                ),
            )
        })?;
        let newest = tail.last().map(|c| c.timestamp);
        if frame.timestamps.last().copied() != newest {
            return Err(ForecastError::data(
                symbol,
                Stage::Inference,
                format!(
                    "model features undefined at the newest candle {}",
                    newest.unwrap_or_default()
                ),
            ));
        }
        let run = frame.trailing_run(meta.timeframe.millis());
        if run < meta.sequence_length {
            return Err(ForecastError::data(
                symbol,
                Stage::Inference,
                format!(
                    "only the newest {} candles have defined features, window needs {}",
                    run, meta.sequence_length
                ),
            ));
        }

        let scaled = self
            .artifact
            .input_scaler
            .transform(window)
            .map_err(|e| e.at(symbol, Stage::Inference))?;
        let raw = self
            .predictor
            .infer(scaled.view())
            .map_err(|e| e.at(symbol, Stage::Inference))?;
        let predicted = self
            .artifact
            .target_scaler
            .inverse_value(raw)
            .map_err(|e| e.at(symbol, Stage::Inference))?;

        if !predicted.is_finite() {
            return Err(ForecastError::data(
                symbol,
                Stage::Inference,
                "model produced a non-finite prediction",
            ));
        }
        let reference = frame.closes[frame.len() - 1];
        Ok((predicted, reference))
    }

    /// Price one model horizon past the newest candle.
    pub fn predict_price(&self, candles: &[Candle]) -> Result<f64> {
        let (ret, reference) = self.predict_return(candles)?;
        Ok(reference * (1.0 + ret))
    }

    /// Recursive forecast covering `horizon_candles` candles.
    pub fn forecast(&self, candles: &[Candle], horizon_candles: usize, confidence: f64) -> Result<ForecastPath<'_>> {
        ForecastPath::new(self, candles, horizon_candles, confidence)
    }
}

/// Sample std of close-to-close returns over the newest candles.
pub fn recent_volatility(candles: &[Candle], lookback: usize) -> f64 {
    let tail = &candles[candles.len().saturating_sub(lookback + 1)..];
    let returns: Vec<f64> = tail
        .windows(2)
        .filter(|w| w[0].close != 0.0)
        .map(|w| w[1].close / w[0].close - 1.0)
        .collect();
    let sigma = crate::services::features::rolling::sample_std(&returns);
    if sigma.is_finite() {
        sigma
    } else {
        0.0
    }
}

/// Lazy, finite multi-step forecast.
///
/// Each step predicts one model horizon ahead, then appends synthetic candles
/// walking linearly from the last close to the prediction: open is the
/// previous close, high and low bracket open and close, and volume repeats
/// the last observed volume. Features are recomputed from the extended
/// series, so no input is zero-filled; a step whose features are undefined
/// at the newest synthetic candle ends the path with an error. Bounds widen
/// with the square root of the number of candles ahead.
pub struct ForecastPath<'a> {
    model: &'a LoadedModel,
    history: Vec<Candle>,
    interval_ms: i64,
    step_candles: usize,
    total_steps: usize,
    step: usize,
    sigma: f64,
    z: f64,
    last_volume: f64,
    done: bool,
}

impl<'a> ForecastPath<'a> {
    pub fn new(model: &'a LoadedModel, candles: &[Candle], horizon_candles: usize, confidence: f64) -> Result<Self> {
        let meta = model.metadata();
        let last = candles.last().ok_or_else(|| {
            ForecastError::insufficient(&meta.symbol, Stage::Inference, "no candles to forecast from")
        })?;
        let step_candles = meta.horizon_steps.max(1);
        let keep = candles.len().saturating_sub(model.context_len());

        Ok(Self {
            model,
            history: candles[keep..].to_vec(),
            interval_ms: meta.timeframe.millis(),
            step_candles,
            total_steps: (horizon_candles.max(1) + step_candles - 1) / step_candles,
            step: 0,
            sigma: recent_volatility(candles, VOLATILITY_LOOKBACK),
            z: z_score(confidence),
            last_volume: last.volume,
            done: false,
        })
    }

    fn advance(&mut self) -> Result<ForecastPoint> {
        let (ret, start_close) = self.model.predict_return(&self.history)?;
        let start_ts = match self.history.last() {
            Some(c) => c.timestamp,
            None => return Err(ForecastError::Internal("forecast history emptied".to_string())),
        };
        let target = start_close * (1.0 + ret);

        let mut prev_close = start_close;
        for k in 1..=self.step_candles {
            let close = start_close + (target - start_close) * k as f64 / self.step_candles as f64;
            self.history.push(Candle::new(
                start_ts + k as i64 * self.interval_ms,
                prev_close,
                prev_close.max(close),
                prev_close.min(close),
                close,
                self.last_volume,
            ));
            prev_close = close;
        }
        let overflow = self.history.len().saturating_sub(self.model.context_len());
        self.history.drain(..overflow);

        self.step += 1;
        let ahead = self.step * self.step_candles;
        let margin = target * self.sigma * self.z * (ahead as f64).sqrt();
        Ok(ForecastPoint {
            step: ahead,
            timestamp: start_ts + self.step_candles as i64 * self.interval_ms,
            price: target,
            lower: target - margin,
            upper: target + margin,
        })
    }
}

impl Iterator for ForecastPath<'_> {
    type Item = Result<ForecastPoint>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.step >= self.total_steps {
            return None;
        }
        let point = self.advance();
        if point.is_err() {
            self.done = true;
        }
        Some(point)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.done { 0 } else { self.total_steps - self.step };
        (0, Some(remaining))
    }
}
