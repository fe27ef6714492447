//! Candle-to-feature-matrix pipeline.
//!
//! Each stage is a pure function from the raw OHLCV columns to a set of new
//! named columns. The engine concatenates the raw columns with every stage's
//! output and keeps only rows where the requested columns are all defined.
//! A row can be undefined mid-series (RSI after a run with no losses), so the
//! kept rows are not always consecutive candles; callers that need
//! consecutive rows check timestamps.

pub mod averages;
pub mod momentum;
pub mod price;
pub mod rolling;
pub mod trend;
pub mod volatility;
pub mod volume;

use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ForecastError, Result, Stage};
use crate::types::{validate_series, Candle};

/// Raw candle columns, in order.
pub const RAW_COLUMNS: [&str; 5] = ["open", "high", "low", "close", "volume"];

/// A named feature column with one value per input candle.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub values: Vec<f64>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// Column-major view of a candle series.
#[derive(Debug, Clone, Default)]
pub struct Ohlcv {
    pub timestamp: Vec<i64>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
}

impl Ohlcv {
    pub fn from_candles(candles: &[Candle]) -> Self {
        Self {
            timestamp: candles.iter().map(|c| c.timestamp).collect(),
            open: candles.iter().map(|c| c.open).collect(),
            high: candles.iter().map(|c| c.high).collect(),
            low: candles.iter().map(|c| c.low).collect(),
            close: candles.iter().map(|c| c.close).collect(),
            volume: candles.iter().map(|c| c.volume).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    fn raw_columns(&self) -> Vec<Column> {
        vec![
            Column::new("open", self.open.clone()),
            Column::new("high", self.high.clone()),
            Column::new("low", self.low.clone()),
            Column::new("close", self.close.clone()),
            Column::new("volume", self.volume.clone()),
        ]
    }
}

type FeatureStage = fn(&Ohlcv) -> Vec<Column>;

const STAGES: [(&str, FeatureStage); 6] = [
    ("price", price::price_features),
    ("averages", averages::moving_averages),
    ("momentum", momentum::momentum_indicators),
    ("volatility", volatility::volatility_indicators),
    ("volume", volume::volume_indicators),
    ("trend", trend::trend_indicators),
];

/// Which columns a model is trained on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureSet {
    /// Raw OHLCV plus every derived column.
    All,
    /// Raw OHLCV plus returns, spreads and volatility.
    Price,
    /// Derived columns only.
    Technical,
}

impl Default for FeatureSet {
    fn default() -> Self {
        FeatureSet::All
    }
}

impl FeatureSet {
    /// Pick this set's columns out of `available`, keeping their order.
    pub fn columns(&self, available: &[String]) -> Vec<String> {
        available
            .iter()
            .filter(|name| {
                let raw = RAW_COLUMNS.contains(&name.as_str());
                match self {
                    FeatureSet::All => true,
                    FeatureSet::Technical => !raw,
                    FeatureSet::Price => {
                        raw || ["returns", "spread", "volatility"]
                            .iter()
                            .any(|key| name.contains(key))
                    }
                }
            })
            .cloned()
            .collect()
    }
}

/// Feature rows with the timestamps and closes they came from.
///
/// Every row is defined in the columns the frame was filtered on; other
/// columns may hold NaN.
#[derive(Debug, Clone)]
pub struct FeatureFrame {
    pub columns: Vec<String>,
    pub timestamps: Vec<i64>,
    pub closes: Vec<f64>,
    pub values: Array2<f64>,
}

impl FeatureFrame {
    pub fn len(&self) -> usize {
        self.values.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.column_index(name).map(|i| self.values.column(i))
    }

    /// Value of `name` in the newest row, if defined.
    pub fn last_value(&self, name: &str) -> Option<f64> {
        let col = self.column(name)?;
        col.iter().last().copied().filter(|v| v.is_finite())
    }

    /// Number of newest rows that are consecutive candles `step_ms` apart.
    pub fn trailing_run(&self, step_ms: i64) -> usize {
        let ts = &self.timestamps;
        if ts.is_empty() {
            return 0;
        }
        1 + ts
            .windows(2)
            .rev()
            .take_while(|pair| pair[1] - pair[0] == step_ms)
            .count()
    }

    /// Matrix of `columns` in the given order.
    ///
    /// Fails on the first name the frame does not carry, so a model trained on
    /// one column list is never fed another.
    pub fn select(&self, symbol: &str, columns: &[String]) -> Result<Array2<f64>> {
        let mut indices = Vec::with_capacity(columns.len());
        for name in columns {
            let idx = self.column_index(name).ok_or_else(|| {
                ForecastError::shape(
                    symbol,
                    Stage::Features,
                    format!("feature column '{}' not present", name),
                )
            })?;
            indices.push(idx);
        }
        Ok(self.values.select(Axis(1), &indices))
    }
}

/// Computes the feature frame for a candle series.
pub struct FeatureEngine;

impl FeatureEngine {
    /// Candles needed before the first fully defined row (longest lookback).
    pub const MIN_HISTORY: usize = 200;

    /// Names of every column produced, in frame order.
    pub fn column_names() -> Vec<String> {
        let empty = Ohlcv::default();
        let mut names: Vec<String> = RAW_COLUMNS.iter().map(|s| s.to_string()).collect();
        for (_, stage) in STAGES {
            names.extend(stage(&empty).into_iter().map(|c| c.name));
        }
        names
    }

    /// Frame whose rows are defined in every column.
    pub fn compute_all_features(symbol: &str, candles: &[Candle]) -> Result<FeatureFrame> {
        Self::compute_features(symbol, candles, &Self::column_names())
    }

    /// Frame whose rows are defined in `required`.
    ///
    /// Undefined values in other columns do not drop a row, so a model only
    /// loses the rows its own inputs cannot describe. Unknown names fail with
    /// a shape error.
    pub fn compute_features(symbol: &str, candles: &[Candle], required: &[String]) -> Result<FeatureFrame> {
        validate_series(symbol, candles)?;

        let data = Ohlcv::from_candles(candles);
        let mut columns = data.raw_columns();
        for (name, stage) in STAGES {
            let produced = stage(&data);
            if let Some(bad) = produced.iter().find(|c| c.values.len() != data.len()) {
                return Err(ForecastError::Internal(format!(
                    "{} stage produced column '{}' with {} rows, expected {}",
                    name,
                    bad.name,
                    bad.values.len(),
                    data.len()
                )));
            }
            columns.extend(produced);
        }

        let mut checked = Vec::with_capacity(required.len());
        for name in required {
            let idx = columns.iter().position(|c| &c.name == name).ok_or_else(|| {
                ForecastError::shape(
                    symbol,
                    Stage::Features,
                    format!("feature column '{}' not present", name),
                )
            })?;
            checked.push(idx);
        }
        let complete: Vec<usize> = (0..data.len())
            .filter(|&row| checked.iter().all(|&c| columns[c].values[row].is_finite()))
            .collect();

        let width = columns.len();
        let mut flat = Vec::with_capacity(complete.len() * width);
        for &row in &complete {
            flat.extend(columns.iter().map(|c| c.values[row]));
        }
        let values = Array2::from_shape_vec((complete.len(), width), flat)
            .map_err(|e| ForecastError::Internal(e.to_string()))?;

        debug!(
            "{}: computed {} features, kept {} of {} rows complete in {} columns",
            symbol,
            width,
            complete.len(),
            data.len(),
            checked.len()
        );

        Ok(FeatureFrame {
            columns: columns.into_iter().map(|c| c.name).collect(),
            timestamps: complete.iter().map(|&r| data.timestamp[r]).collect(),
            closes: complete.iter().map(|&r| data.close[r]).collect(),
            values,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Rising series whose closes alternate above and below the trend line,
    /// so every oscillator stays defined.
    pub(crate) fn zigzag_candles(count: usize) -> Vec<Candle> {
        (0..count)
            .map(|i| {
                let trend = 100.0 + i as f64 * 0.5;
                let close = if i % 2 == 0 { trend + 1.0 } else { trend - 1.0 };
                Candle::new(
                    1_000_000 + i as i64 * 60_000,
                    trend,
                    close + 1.0,
                    close - 1.0,
                    close,
                    1000.0 + (i % 5) as f64 * 100.0,
                )
            })
            .collect()
    }

    #[test]
    fn test_column_names_unique_and_complete() {
        let names = FeatureEngine::column_names();
        assert_eq!(names.len(), 50);
        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), names.len());
        for expected in ["returns", "ema_200", "macd_histogram", "bb_position_20", "aroon_oscillator"] {
            assert!(names.iter().any(|n| n == expected), "missing {}", expected);
        }
    }

    #[test]
    fn test_warmup_rows_dropped() {
        let candles = zigzag_candles(300);
        let frame = FeatureEngine::compute_all_features("BTCUSDT", &candles).unwrap();
        assert_eq!(frame.len(), 300 - (FeatureEngine::MIN_HISTORY - 1));
        assert_eq!(frame.timestamps[0], candles[FeatureEngine::MIN_HISTORY - 1].timestamp);
        assert_eq!(frame.closes[0], candles[FeatureEngine::MIN_HISTORY - 1].close);
        assert!(frame.values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_short_series_yields_empty_frame() {
        let frame = FeatureEngine::compute_all_features("BTCUSDT", &zigzag_candles(150)).unwrap();
        assert!(frame.is_empty());
        assert_eq!(frame.columns.len(), 50);
    }

    #[test]
    fn test_rejects_unordered_series() {
        let mut candles = zigzag_candles(10);
        candles.swap(3, 4);
        let err = FeatureEngine::compute_all_features("BTCUSDT", &candles).unwrap_err();
        assert!(matches!(err, ForecastError::Data { .. }));
    }

    #[test]
    fn test_later_rows_do_not_change_earlier_output() {
        let candles = zigzag_candles(320);
        let baseline = FeatureEngine::compute_all_features("BTCUSDT", &candles).unwrap();

        let cutoff = 260;
        let mut perturbed = candles.clone();
        for c in perturbed.iter_mut().skip(cutoff + 1) {
            c.close *= 1.7;
            c.high = c.close + 5.0;
            c.low = c.close - 3.0;
            c.volume *= 9.0;
        }
        let changed = FeatureEngine::compute_all_features("BTCUSDT", &perturbed).unwrap();

        let cutoff_ts = candles[cutoff].timestamp;
        let rows = baseline.timestamps.iter().filter(|&&t| t <= cutoff_ts).count();
        assert!(rows > 0);
        for row in 0..rows {
            assert_eq!(baseline.timestamps[row], changed.timestamps[row]);
            assert_eq!(baseline.values.row(row), changed.values.row(row));
        }
    }

    #[test]
    fn test_select_preserves_order_and_names_missing_column() {
        let frame = FeatureEngine::compute_all_features("BTCUSDT", &zigzag_candles(260)).unwrap();
        let picked = frame
            .select("BTCUSDT", &["rsi_14".to_string(), "close".to_string()])
            .unwrap();
        assert_eq!(picked.ncols(), 2);
        assert_eq!(picked[[0, 1]], frame.closes[0]);

        let err = frame
            .select("BTCUSDT", &["close".to_string(), "sentiment".to_string()])
            .unwrap_err();
        assert!(matches!(err, ForecastError::Shape { .. }));
        assert!(err.to_string().contains("sentiment"));
    }

    /// Zigzag series with a steady climb of `run` candles starting at `at`.
    /// The climb rises at the trend's pace.
    pub(crate) fn zigzag_with_climb(count: usize, at: usize, run: usize) -> Vec<Candle> {
        let mut candles = zigzag_candles(count);
        let mut close = candles[at - 1].close;
        for c in candles.iter_mut().skip(at).take(run) {
            c.open = close;
            close += 0.5;
            c.close = close;
            c.high = close + 0.25;
            c.low = c.open - 0.25;
        }
        candles
    }

    #[test]
    fn test_only_required_columns_drop_rows() {
        let candles = zigzag_with_climb(260, 230, 12);
        let all = FeatureEngine::compute_all_features("BTCUSDT", &candles).unwrap();
        // rsi_7 has no losses to divide by late in the climb
        assert!(all.len() < 260 - (FeatureEngine::MIN_HISTORY - 1));
        assert!(all.trailing_run(60_000) < all.len());

        let required = vec!["close".to_string(), "returns".to_string()];
        let price = FeatureEngine::compute_features("BTCUSDT", &candles, &required).unwrap();
        assert_eq!(price.len(), 259);
        assert_eq!(price.trailing_run(60_000), 259);
        assert_eq!(price.timestamps.last(), candles.last().map(|c| &c.timestamp));
        assert!(price.column("rsi_7").unwrap().iter().any(|v| v.is_nan()));
        assert_eq!(price.last_value("close"), Some(candles[259].close));
    }

    #[test]
    fn test_unknown_required_column() {
        let err = FeatureEngine::compute_features("BTCUSDT", &zigzag_candles(20), &["sentiment".to_string()])
            .unwrap_err();
        assert!(matches!(err, ForecastError::Shape { .. }));
    }

    #[test]
    fn test_trailing_run() {
        let frame = FeatureEngine::compute_all_features("BTCUSDT", &zigzag_candles(260)).unwrap();
        assert_eq!(frame.trailing_run(60_000), frame.len());
        assert_eq!(frame.trailing_run(120_000), 1);
    }

    #[test]
    fn test_feature_sets() {
        let names = FeatureEngine::column_names();
        let technical = FeatureSet::Technical.columns(&names);
        assert_eq!(technical.len(), 45);
        assert!(!technical.contains(&"close".to_string()));

        let price = FeatureSet::Price.columns(&names);
        assert!(price.contains(&"close".to_string()));
        assert!(price.contains(&"volatility_50".to_string()));
        assert!(price.contains(&"log_returns".to_string()));
        assert!(!price.contains(&"rsi_14".to_string()));
        assert_eq!(FeatureSet::All.columns(&names).len(), 50);
    }
}
