//! Forecast endpoints.

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;

use crate::api::ApiResponse;
use crate::error::Result;
use crate::services::pipeline::{EnsembleForecast, Forecast};
use crate::types::{EnsembleStrategy, Horizon};
use crate::AppState;

fn default_horizon() -> Horizon {
    Horizon::ONE_HOUR
}

fn default_confidence() -> f64 {
    0.95
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictRequest {
    pub symbol: String,
    #[serde(default = "default_horizon")]
    pub horizon: Horizon,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsembleRequest {
    pub symbol: String,
    #[serde(default = "default_horizon")]
    pub horizon: Horizon,
    #[serde(default)]
    pub strategy: EnsembleStrategy,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/predict", post(predict))
        .route("/predict/ensemble", post(predict_ensemble))
}

async fn predict(
    State(state): State<AppState>,
    Json(request): Json<PredictRequest>,
) -> Result<Json<ApiResponse<Forecast>>> {
    let forecast = state
        .service
        .predict(&request.symbol, request.horizon, request.confidence)
        .await?;
    Ok(Json(ApiResponse::new(forecast)))
}

async fn predict_ensemble(
    State(state): State<AppState>,
    Json(request): Json<EnsembleRequest>,
) -> Result<Json<ApiResponse<EnsembleForecast>>> {
    let forecast = state
        .service
        .predict_ensemble(&request.symbol, request.horizon, request.strategy)
        .await?;
    Ok(Json(ApiResponse::new(forecast)))
}
