pub mod health;
pub mod models;
pub mod prediction;
pub mod training;

use crate::AppState;
use axum::Router;
use serde::Serialize;

/// Success envelope for every `/api/ml` response.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    pub timestamp: i64,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

fn ml_router() -> Router<AppState> {
    Router::new()
        .merge(training::router())
        .merge(prediction::router())
        .merge(models::router())
}

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .nest("/api/ml", ml_router())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_envelope() {
        let json = serde_json::to_value(ApiResponse::new(vec![1, 2])).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"], serde_json::json!([1, 2]));
        assert!(json["timestamp"].as_i64().unwrap() > 0);
    }
}
