//! Historical candle sources.

pub mod binance;
pub mod sqlite;

pub use binance::BinanceKlines;
pub use sqlite::SqliteCandleStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ForecastError, Result, Stage};
use crate::types::{Candle, Timeframe};

/// Something that can hand back candles for a time range.
#[async_trait]
pub trait CandleSource: Send + Sync {
    fn name(&self) -> &str;

    /// Candles for `symbol` with open time in `[start, end]`, oldest first.
    async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;
}

/// Retries transient failures of an inner source with exponential backoff.
pub struct RetryingSource<S> {
    inner: S,
    max_attempts: u32,
    base_delay: Duration,
}

impl<S: CandleSource> RetryingSource<S> {
    pub fn new(inner: S, max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: CandleSource> CandleSource for RetryingSource<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let mut delay = self.base_delay;
        let mut attempt = 1;
        loop {
            match self.inner.fetch(symbol, timeframe, start, end).await {
                Ok(candles) => {
                    debug!(
                        "{}: fetched {} candles from {} (attempt {})",
                        symbol,
                        candles.len(),
                        self.inner.name(),
                        attempt
                    );
                    return Ok(candles);
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(ForecastError::data(
                        symbol,
                        Stage::Fetch,
                        format!(
                            "{} failed after {} attempts: {}",
                            self.inner.name(),
                            attempt,
                            e
                        ),
                    ));
                }
                Err(e) => {
                    warn!(
                        "{}: fetch from {} failed (attempt {}/{}), retrying in {:?}: {}",
                        symbol,
                        self.inner.name(),
                        attempt,
                        self.max_attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }
}

/// In-memory candles keyed by symbol.
#[derive(Default)]
pub struct StaticSource {
    candles: HashMap<String, Vec<Candle>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_candles(mut self, symbol: &str, candles: Vec<Candle>) -> Self {
        self.candles.insert(symbol.to_ascii_uppercase(), candles);
        self
    }
}

#[async_trait]
impl CandleSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch(
        &self,
        symbol: &str,
        _timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let (from, to) = (start.timestamp_millis(), end.timestamp_millis());
        Ok(self
            .candles
            .get(&symbol.to_ascii_uppercase())
            .map(|all| {
                all.iter()
                    .filter(|c| c.timestamp >= from && c.timestamp <= to)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}
