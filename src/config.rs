use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::sources::binance::BINANCE_API_URL;
use crate::types::{Hyperparameters, Timeframe};

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Root directory for published artifacts.
    pub model_dir: PathBuf,
    /// SQLite candle database. When unset, candles come from Binance.
    pub candle_db_path: Option<PathBuf>,
    pub binance_api_url: String,
    /// Attempts per candle fetch before giving up.
    pub fetch_max_attempts: u32,
    /// First retry delay; doubles on each further attempt.
    pub fetch_backoff: Duration,
    /// How long a loaded artifact stays cached.
    pub model_expiry: Duration,
    pub max_models_in_memory: usize,
    /// Upper bound on candles covered by one forecast.
    pub max_forecast_steps: usize,
    /// Candle history fetched for inference.
    pub inference_lookback_days: u32,
    pub timeframe: Timeframe,
    /// Fewest candles a training request may run on.
    pub min_training_candles: usize,
    /// Hyperparameters used where a training request sets none.
    pub training: Hyperparameters,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3002,
            model_dir: PathBuf::from("models"),
            candle_db_path: None,
            binance_api_url: BINANCE_API_URL.to_string(),
            fetch_max_attempts: 3,
            fetch_backoff: Duration::from_millis(500),
            model_expiry: Duration::from_secs(24 * 3600),
            max_models_in_memory: 10,
            max_forecast_steps: 1440,
            inference_lookback_days: 7,
            timeframe: Timeframe::OneMinute,
            min_training_candles: 1000,
            training: Hyperparameters::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; missing or unparsable values keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |key: &str| -> Option<String> { lookup(key).filter(|v| !v.trim().is_empty()) };
        fn or<T: FromStr>(value: Option<String>, default: T) -> T {
            value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
        }

        let base = defaults.training.clone();
        let training = Hyperparameters {
            sequence_length: or(parsed("DEFAULT_SEQUENCE_LENGTH"), base.sequence_length),
            learning_rate: or(parsed("DEFAULT_LEARNING_RATE"), base.learning_rate),
            batch_size: or(parsed("DEFAULT_BATCH_SIZE"), base.batch_size),
            epochs: or(parsed("DEFAULT_EPOCHS"), base.epochs),
            early_stopping_patience: or(parsed("EARLY_STOPPING_PATIENCE"), base.early_stopping_patience),
            scheduler_patience: or(parsed("SCHEDULER_PATIENCE"), base.scheduler_patience),
            hidden_size: or(parsed("DEFAULT_HIDDEN_SIZE"), base.hidden_size),
            lookback_days: or(parsed("DEFAULT_LOOKBACK_DAYS"), base.lookback_days),
            ..base
        };

        Self {
            host: parsed("HOST").unwrap_or(defaults.host),
            port: or(parsed("PORT"), defaults.port),
            model_dir: parsed("MODEL_DIR").map(PathBuf::from).unwrap_or(defaults.model_dir),
            candle_db_path: parsed("CANDLE_DB_PATH").map(PathBuf::from),
            binance_api_url: parsed("BINANCE_API_URL").unwrap_or(defaults.binance_api_url),
            fetch_max_attempts: or(parsed("FETCH_MAX_ATTEMPTS"), defaults.fetch_max_attempts),
            fetch_backoff: Duration::from_millis(or(
                parsed("FETCH_BACKOFF_MS"),
                defaults.fetch_backoff.as_millis() as u64,
            )),
            model_expiry: Duration::from_secs(
                3600 * or(parsed("MODEL_EXPIRY_HOURS"), defaults.model_expiry.as_secs() / 3600),
            ),
            max_models_in_memory: or(parsed("MAX_MODELS_IN_MEMORY"), defaults.max_models_in_memory),
            max_forecast_steps: or(parsed("MAX_FORECAST_STEPS"), defaults.max_forecast_steps),
            inference_lookback_days: or(parsed("INFERENCE_LOOKBACK_DAYS"), defaults.inference_lookback_days),
            timeframe: parsed("CANDLE_TIMEFRAME")
                .and_then(|v| Timeframe::from_str(v.trim()))
                .unwrap_or(defaults.timeframe),
            min_training_candles: or(parsed("MIN_TRAINING_CANDLES"), defaults.min_training_candles),
            training,
        }
    }
}
