use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Pipeline stage an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Features,
    Scaling,
    Windowing,
    Training,
    Evaluation,
    Persistence,
    Inference,
    Ensemble,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Features => "features",
            Stage::Scaling => "scaling",
            Stage::Windowing => "windowing",
            Stage::Training => "training",
            Stage::Evaluation => "evaluation",
            Stage::Persistence => "persistence",
            Stage::Inference => "inference",
            Stage::Ensemble => "ensemble",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application error types.
///
/// Domain variants carry the symbol and stage so callers can tell which
/// request and which step of the pipeline failed.
#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("{symbol} [{stage}]: {message}")]
    Data {
        symbol: String,
        stage: Stage,
        message: String,
    },

    #[error("{symbol} [{stage}]: shape mismatch: {message}")]
    Shape {
        symbol: String,
        stage: Stage,
        message: String,
    },

    #[error("{symbol} [{stage}]: scaler used before it was fitted")]
    NotFitted { symbol: String, stage: Stage },

    #[error("{symbol} [training]: loss diverged at epoch {epoch} (loss = {loss})")]
    DivergedTraining {
        symbol: String,
        epoch: usize,
        loss: f64,
    },

    #[error("{symbol} [{stage}]: insufficient data: {message}")]
    InsufficientData {
        symbol: String,
        stage: Stage,
        message: String,
    },

    #[error("{symbol} [ensemble]: no trained models available")]
    NoModelsAvailable { symbol: String },

    #[error("{symbol} [ensemble]: none of {attempted} models produced a prediction")]
    NoValidPredictions { symbol: String, attempted: usize },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
}

impl ForecastError {
    pub fn data(symbol: &str, stage: Stage, message: impl Into<String>) -> Self {
        ForecastError::Data {
            symbol: symbol.to_string(),
            stage,
            message: message.into(),
        }
    }

    pub fn shape(symbol: &str, stage: Stage, message: impl Into<String>) -> Self {
        ForecastError::Shape {
            symbol: symbol.to_string(),
            stage,
            message: message.into(),
        }
    }

    pub fn insufficient(symbol: &str, stage: Stage, message: impl Into<String>) -> Self {
        ForecastError::InsufficientData {
            symbol: symbol.to_string(),
            stage,
            message: message.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ForecastError::Data { .. }
                | ForecastError::Io(_)
                | ForecastError::Sqlite(_)
                | ForecastError::Reqwest(_)
        )
    }

    fn status(&self) -> StatusCode {
        match self {
            ForecastError::Data {
                stage: Stage::Fetch,
                ..
            } => StatusCode::BAD_GATEWAY,
            ForecastError::Data { .. } | ForecastError::Shape { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ForecastError::DivergedTraining { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ForecastError::InsufficientData { .. } => StatusCode::BAD_REQUEST,
            ForecastError::NoModelsAvailable { .. } => StatusCode::NOT_FOUND,
            ForecastError::NoValidPredictions { .. } => StatusCode::BAD_GATEWAY,
            ForecastError::BadRequest(_) | ForecastError::SerdeJson(_) => StatusCode::BAD_REQUEST,
            ForecastError::NotFound(_) => StatusCode::NOT_FOUND,
            ForecastError::Reqwest(_) => StatusCode::BAD_GATEWAY,
            ForecastError::NotFitted { .. }
            | ForecastError::Config(_)
            | ForecastError::Internal(_)
            | ForecastError::Io(_)
            | ForecastError::Sqlite(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ForecastError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ForecastError>;
