use foresight::sources::{BinanceKlines, CandleSource, RetryingSource, SqliteCandleStore};
use foresight::{api, AppState, Config, ForecastService};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "foresight=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env());
    info!("Starting Foresight server on {}:{}", config.host, config.port);

    let source: Arc<dyn CandleSource> = match &config.candle_db_path {
        Some(path) => {
            info!("Reading candles from SQLite at {}", path.display());
            Arc::new(RetryingSource::new(
                SqliteCandleStore::new(path)?,
                config.fetch_max_attempts,
                config.fetch_backoff,
            ))
        }
        None => {
            info!("Reading candles from {}", config.binance_api_url);
            Arc::new(RetryingSource::new(
                BinanceKlines::new(config.binance_api_url.clone()),
                config.fetch_max_attempts,
                config.fetch_backoff,
            ))
        }
    };

    let service = Arc::new(ForecastService::from_config(source, &config)?);
    info!("Model directory: {}", service.store().root().display());

    let state = AppState {
        config: Arc::clone(&config),
        service,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = api::router()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
