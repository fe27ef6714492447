//! Training endpoint.

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;

use crate::api::ApiResponse;
use crate::error::Result;
use crate::services::features::FeatureSet;
use crate::services::pipeline::TrainOutcome;
use crate::services::predictor::PredictorKind;
use crate::services::scaler::ScalingMethod;
use crate::types::Hyperparameters;
use crate::AppState;

/// Training request. Unset fields fall back to the configured defaults.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainRequest {
    pub symbol: String,
    pub model_type: Option<PredictorKind>,
    pub sequence_length: Option<usize>,
    pub horizon_steps: Option<usize>,
    pub hidden_size: Option<usize>,
    pub learning_rate: Option<f64>,
    pub weight_decay: Option<f64>,
    pub batch_size: Option<usize>,
    pub epochs: Option<usize>,
    pub early_stopping_patience: Option<usize>,
    pub scheduler_patience: Option<usize>,
    pub normalization: Option<ScalingMethod>,
    pub feature_set: Option<FeatureSet>,
    pub lookback_days: Option<u32>,
    pub seed: Option<u64>,
}

impl TrainRequest {
    /// `base` with every field this request sets replaced.
    pub fn hyperparameters(&self, base: &Hyperparameters) -> Hyperparameters {
        Hyperparameters {
            model_type: self.model_type.unwrap_or(base.model_type),
            sequence_length: self.sequence_length.unwrap_or(base.sequence_length),
            horizon_steps: self.horizon_steps.unwrap_or(base.horizon_steps),
            hidden_size: self.hidden_size.unwrap_or(base.hidden_size),
            learning_rate: self.learning_rate.unwrap_or(base.learning_rate),
            weight_decay: self.weight_decay.unwrap_or(base.weight_decay),
            batch_size: self.batch_size.unwrap_or(base.batch_size),
            epochs: self.epochs.unwrap_or(base.epochs),
            early_stopping_patience: self.early_stopping_patience.unwrap_or(base.early_stopping_patience),
            scheduler_patience: self.scheduler_patience.unwrap_or(base.scheduler_patience),
            normalization: self.normalization.unwrap_or(base.normalization),
            feature_set: self.feature_set.unwrap_or(base.feature_set),
            lookback_days: self.lookback_days.unwrap_or(base.lookback_days),
            seed: self.seed.unwrap_or(base.seed),
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/train", post(train))
}

/// Train and publish one model.
async fn train(
    State(state): State<AppState>,
    Json(request): Json<TrainRequest>,
) -> Result<Json<ApiResponse<TrainOutcome>>> {
    let hyperparameters = request.hyperparameters(&state.config.training);
    let outcome = state.service.train(&request.symbol, hyperparameters).await?;
    Ok(Json(ApiResponse::new(outcome)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ForecastError, Stage};
    use crate::test_support::test_state;

    #[test]
    fn test_request_overrides_defaults() {
        let request: TrainRequest = serde_json::from_value(serde_json::json!({
            "symbol": "BTCUSDT",
            "modelType": "linear",
            "sequenceLength": 20,
            "normalization": "robust"
        }))
        .unwrap();
        let base = Hyperparameters {
            epochs: 7,
            ..Hyperparameters::default()
        };

        let hp = request.hyperparameters(&base);
        assert_eq!(hp.model_type, PredictorKind::Linear);
        assert_eq!(hp.sequence_length, 20);
        assert_eq!(hp.normalization, ScalingMethod::Robust);
        assert_eq!(hp.epochs, 7);
        assert_eq!(hp.hidden_size, base.hidden_size);
    }

    #[tokio::test]
    async fn test_train_without_history_fails() {
        let dir = tempfile::tempdir().unwrap();
        let request = TrainRequest {
            symbol: "BTCUSDT".to_string(),
            model_type: None,
            sequence_length: None,
            horizon_steps: None,
            hidden_size: None,
            learning_rate: None,
            weight_decay: None,
            batch_size: None,
            epochs: None,
            early_stopping_patience: None,
            scheduler_patience: None,
            normalization: None,
            feature_set: None,
            lookback_days: None,
            seed: None,
        };
        let err = train(State(test_state(dir.path())), Json(request)).await.unwrap_err();
        assert!(matches!(err, ForecastError::Data { stage: Stage::Fetch, .. }));
    }
}
