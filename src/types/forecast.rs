use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ForecastError, Result};
use crate::types::Timeframe;

/// Forecast horizon, stored in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Horizon {
    minutes: u32,
}

impl Horizon {
    pub const ONE_HOUR: Horizon = Horizon { minutes: 60 };

    pub fn from_minutes(minutes: u32) -> Result<Self> {
        if minutes == 0 {
            return Err(ForecastError::BadRequest(
                "horizon must be at least one minute".to_string(),
            ));
        }
        Ok(Self { minutes })
    }

    /// Parse `15m`, `1h`, `4h`, `1d`, `7d` or any `<n>m`, `<n>h`, `<n>d`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let bad = || ForecastError::BadRequest(format!("invalid horizon '{}'", s));
        if s.len() < 2 {
            return Err(bad());
        }
        let (num, unit) = s.split_at(s.len() - 1);
        let n: u32 = num.parse().map_err(|_| bad())?;
        let minutes = match unit {
            "m" => n,
            "h" => n.checked_mul(60).ok_or_else(bad)?,
            "d" => n.checked_mul(1440).ok_or_else(bad)?,
            _ => return Err(bad()),
        };
        Self::from_minutes(minutes)
    }

    pub fn minutes(&self) -> u32 {
        self.minutes
    }

    /// Number of candles of `timeframe` covered by this horizon (at least one).
    pub fn steps(&self, timeframe: Timeframe) -> usize {
        ((self.minutes / timeframe.minutes()).max(1)) as usize
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.minutes % 1440 == 0 {
            write!(f, "{}d", self.minutes / 1440)
        } else if self.minutes % 60 == 0 {
            write!(f, "{}h", self.minutes / 60)
        } else {
            write!(f, "{}m", self.minutes)
        }
    }
}

impl Serialize for Horizon {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Horizon {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Horizon::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Z-score for a two-sided interval at `confidence`.
pub fn z_score(confidence: f64) -> f64 {
    const TABLE: [(f64, f64); 4] = [(0.80, 1.28), (0.90, 1.645), (0.95, 1.96), (0.99, 2.576)];
    TABLE
        .iter()
        .find(|(c, _)| (c - confidence).abs() < 1e-9)
        .map(|(_, z)| *z)
        .unwrap_or(1.96)
}

/// One point of a forecast path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastPoint {
    pub step: usize,
    pub timestamp: i64,
    pub price: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Ensemble merge strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsembleStrategy {
    WeightedAverage,
    Voting,
}

impl EnsembleStrategy {
    /// Parse a strategy name, case-insensitive.
    ///
    /// `stacking` is refused rather than silently treated as a weighted average.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weighted_average" | "weighted" => Ok(EnsembleStrategy::WeightedAverage),
            "voting" => Ok(EnsembleStrategy::Voting),
            "stacking" => Err(ForecastError::BadRequest(
                "stacking is not supported; use weighted_average or voting".to_string(),
            )),
            other => Err(ForecastError::BadRequest(format!(
                "unknown ensemble strategy '{}'",
                other
            ))),
        }
    }
}

impl Default for EnsembleStrategy {
    fn default() -> Self {
        EnsembleStrategy::WeightedAverage
    }
}

impl<'de> Deserialize<'de> for EnsembleStrategy {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        EnsembleStrategy::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A surviving member's contribution to an ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPrediction {
    pub model: String,
    pub predicted_price: f64,
    pub weight: f64,
}

/// A member excluded because its inference failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelFailure {
    pub model: String,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Votes {
    pub above: usize,
    pub below: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsembleResult {
    pub strategy: EnsembleStrategy,
    pub predicted_price: f64,
    pub confidence: f64,
    pub models_used: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub votes: Option<Votes>,
    pub individual_predictions: Vec<ModelPrediction>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub failures: Vec<ModelFailure>,
}
