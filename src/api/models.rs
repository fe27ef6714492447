//! Published model listing and removal.

use axum::{
    extract::{Path, State},
    routing::{delete, get},
    Json, Router,
};
use serde::Serialize;

use crate::api::ApiResponse;
use crate::error::Result;
use crate::services::pipeline::ModelStats;
use crate::services::registry::ModelSummary;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelList {
    pub count: usize,
    pub models: Vec<ModelSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub symbol: String,
    pub deleted: usize,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/models", get(list_models))
        .route("/models/:symbol/stats", get(model_stats))
        .route("/models/:symbol", delete(delete_models))
}

async fn list_models(State(state): State<AppState>) -> Result<Json<ApiResponse<ModelList>>> {
    let models = state.service.list_models()?;
    Ok(Json(ApiResponse::new(ModelList {
        count: models.len(),
        models,
    })))
}

async fn model_stats(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<ApiResponse<ModelStats>>> {
    Ok(Json(ApiResponse::new(state.service.model_stats(&symbol)?)))
}

async fn delete_models(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<ApiResponse<DeleteResponse>>> {
    let deleted = state.service.delete_models(&symbol)?;
    Ok(Json(ApiResponse::new(DeleteResponse {
        symbol: symbol.to_uppercase(),
        deleted,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForecastError;
    use crate::services::predictor::PredictorKind;
    use crate::services::registry::tests::sample_artifact;
    use crate::test_support::test_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_list_stats_delete() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        state
            .service
            .store()
            .publish(&sample_artifact("SOLUSDT", PredictorKind::Mlp, vec!["close".into()]))
            .unwrap();

        let Json(list) = list_models(State(state.clone())).await.unwrap();
        assert_eq!(list.data.count, 1);

        let Json(stats) = model_stats(State(state.clone()), Path("solusdt".to_string()))
            .await
            .unwrap();
        assert_eq!(stats.data.model_count, 1);

        let Json(deleted) = delete_models(State(state.clone()), Path("solusdt".to_string()))
            .await
            .unwrap();
        assert_eq!(deleted.data.deleted, 1);
        assert_eq!(deleted.data.symbol, "SOLUSDT");

        let err = model_stats(State(state), Path("SOLUSDT".to_string())).await.unwrap_err();
        assert!(matches!(err, ForecastError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_routes_are_nested_under_ml() {
        let dir = tempfile::tempdir().unwrap();
        let app = crate::api::router().with_state(test_state(dir.path()));

        let response = app
            .clone()
            .oneshot(Request::get("/api/ml/models").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["count"], 0);

        let response = app
            .oneshot(
                Request::delete("/api/ml/models/NOPE")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
