use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ForecastError, Result, Stage};
use crate::sources::CandleSource;
use crate::types::{Candle, Timeframe};

pub const BINANCE_API_URL: &str = "https://api.binance.com";

/// Maximum rows Binance returns per klines request.
const PAGE_LIMIT: usize = 1000;

/// Binance public klines endpoint, paged over the requested range.
#[derive(Clone)]
pub struct BinanceKlines {
    client: Client,
    base_url: String,
}

impl BinanceKlines {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .user_agent("Foresight/0.1")
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn fetch_page(&self, symbol: &str, timeframe: Timeframe, start: i64, end: i64) -> Result<Vec<Candle>> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol.to_string()),
                ("interval", timeframe.as_str().to_string()),
                ("startTime", start.to_string()),
                ("endTime", end.to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("Binance klines returned {}: {}", status, error_excerpt(&text));
            if status.is_client_error() && status.as_u16() != 429 {
                return Err(ForecastError::BadRequest(format!(
                    "Binance rejected klines request for {}: {}",
                    symbol, status
                )));
            }
            return Err(ForecastError::data(
                symbol,
                Stage::Fetch,
                format!("Binance API error: {}", status),
            ));
        }

        let rows: Vec<Vec<Value>> = response.json().await?;
        rows.iter().map(|row| parse_kline(symbol, row)).collect()
    }
}

/// First 200 characters of an error body, cut on a character boundary.
fn error_excerpt(body: &str) -> String {
    body.chars().take(200).collect()
}

/// One klines row: `[open_time, "open", "high", "low", "close", "volume", ...]`.
fn parse_kline(symbol: &str, row: &[Value]) -> Result<Candle> {
    let bad = |what: &str| ForecastError::data(symbol, Stage::Fetch, format!("malformed kline: {}", what));
    let timestamp = row.first().and_then(Value::as_i64).ok_or_else(|| bad("open time"))?;
    let number = |idx: usize, name: &str| -> Result<f64> {
        match row.get(idx) {
            Some(Value::String(s)) => s.parse().map_err(|_| bad(name)),
            Some(Value::Number(n)) => n.as_f64().ok_or_else(|| bad(name)),
            _ => Err(bad(name)),
        }
    };
    Ok(Candle {
        timestamp,
        open: number(1, "open")?,
        high: number(2, "high")?,
        low: number(3, "low")?,
        close: number(4, "close")?,
        volume: number(5, "volume")?,
    })
}

#[async_trait]
impl CandleSource for BinanceKlines {
    fn name(&self) -> &str {
        "binance"
    }

    async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let symbol = symbol.to_ascii_uppercase();
        let end_ms = end.timestamp_millis();
        let mut cursor = start.timestamp_millis();
        let mut out: Vec<Candle> = Vec::new();

        while cursor <= end_ms {
            let page = self.fetch_page(&symbol, timeframe, cursor, end_ms).await?;
            let full = page.len() >= PAGE_LIMIT;
            let Some(last) = page.last().map(|c| c.timestamp) else {
                break;
            };
            let newest = out.last().map(|c| c.timestamp);
            out.extend(
                page.into_iter()
                    .filter(|c| newest.map(|t| c.timestamp > t).unwrap_or(true)),
            );
            if !full {
                break;
            }
            cursor = last + timeframe.millis();
        }

        debug!("Binance: {} {} candles for {}", out.len(), timeframe.as_str(), symbol);
        Ok(out)
    }
}
