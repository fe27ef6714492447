//! Foresight - short-horizon price forecasting service.
//!
//! Candles come in through a [`sources::CandleSource`], flow through the
//! feature, scaling and windowing stages into a trainable predictor, and are
//! published as artifacts that the forecast and ensemble paths load back.

pub mod api;
pub mod config;
pub mod error;
pub mod services;
pub mod sources;
pub mod types;

use std::sync::Arc;

pub use config::Config;
pub use error::{ForecastError, Result, Stage};
pub use services::ForecastService;
pub use types::*;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub service: Arc<ForecastService>,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::sources::StaticSource;
    use std::path::Path;

    /// State over an empty static source and an artifact store in `dir`.
    pub(crate) fn test_state(dir: &Path) -> AppState {
        let config = Config {
            model_dir: dir.to_path_buf(),
            ..Config::default()
        };
        let service = ForecastService::from_config(Arc::new(StaticSource::new()), &config).unwrap();
        AppState {
            config: Arc::new(config),
            service: Arc::new(service),
        }
    }
}
