use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::features::FeatureSet;
use crate::services::predictor::PredictorKind;
use crate::services::scaler::ScalingMethod;
use crate::services::trainer::TrainingHistory;
use crate::types::Timeframe;

/// Artifact format version written into every metadata document.
pub const ARTIFACT_VERSION: &str = "1.0.0";

/// Weight given to a model with no usable accuracy figure.
pub const DEFAULT_MODEL_WEIGHT: f64 = 0.5;

/// What the predictor's scalar output means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Simple return of the close `horizon_steps` rows past the window.
    ForwardReturn,
}

/// Training hyperparameters. Every field has a default; requests override
/// individual fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    pub model_type: PredictorKind,
    pub sequence_length: usize,
    pub horizon_steps: usize,
    pub hidden_size: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub batch_size: usize,
    pub epochs: usize,
    pub early_stopping_patience: usize,
    pub scheduler_patience: usize,
    pub normalization: ScalingMethod,
    pub feature_set: FeatureSet,
    pub lookback_days: u32,
    pub seed: u64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            model_type: PredictorKind::Mlp,
            sequence_length: 60,
            horizon_steps: 1,
            hidden_size: 32,
            learning_rate: 0.001,
            weight_decay: 1e-5,
            batch_size: 32,
            epochs: 100,
            early_stopping_patience: 10,
            scheduler_patience: 5,
            normalization: ScalingMethod::Standard,
            feature_set: FeatureSet::All,
            lookback_days: 30,
            seed: 42,
        }
    }
}

/// Held-out evaluation metrics. MAPE and directional accuracy are percentages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub mae: f64,
    pub rmse: f64,
    pub mape: f64,
    pub r2: f64,
    pub directional_accuracy: f64,
}

/// Metadata stored next to a published artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub symbol: String,
    pub model_type: PredictorKind,
    pub version: String,
    pub run_id: Uuid,
    pub trained_at: DateTime<Utc>,
    pub timeframe: Timeframe,
    pub feature_columns: Vec<String>,
    pub sequence_length: usize,
    pub horizon_steps: usize,
    pub target: TargetKind,
    pub hyperparameters: Hyperparameters,
    #[serde(default)]
    pub metrics: Option<Metrics>,
    pub training: TrainingHistory,
}

impl ModelMetadata {
    /// Ensemble weight: historical directional accuracy as a fraction.
    pub fn weight(&self) -> f64 {
        self.metrics
            .map(|m| m.directional_accuracy / 100.0)
            .filter(|w| w.is_finite())
            .map(|w| w.clamp(0.0, 1.0))
            .unwrap_or(DEFAULT_MODEL_WEIGHT)
    }
}
