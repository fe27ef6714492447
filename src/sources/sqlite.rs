//! SQLite-backed candle store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::error::{ForecastError, Result};
use crate::sources::CandleSource;
use crate::types::{Candle, Timeframe};

/// Candle history in a local SQLite database.
pub struct SqliteCandleStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCandleStore {
    /// Open (or create) the database at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        info!("SQLite candle store initialized");
        Ok(store)
    }

    /// In-memory database, for tests.
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        debug!("In-memory SQLite candle store initialized");
        Ok(store)
    }

    fn lock(conn: &Mutex<Connection>) -> Result<std::sync::MutexGuard<'_, Connection>> {
        conn.lock()
            .map_err(|_| ForecastError::Internal("candle store lock poisoned".to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = Self::lock(&self.conn)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS candles (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                PRIMARY KEY (symbol, timeframe, timestamp)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_candles_symbol_time
             ON candles(symbol, timeframe, timestamp DESC)",
            [],
        )?;
        Ok(())
    }

    /// Insert or replace candles. Returns the number of rows written.
    pub fn insert_candles(&self, symbol: &str, timeframe: Timeframe, candles: &[Candle]) -> Result<usize> {
        let mut conn = Self::lock(&self.conn)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO candles
                 (symbol, timeframe, timestamp, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for c in candles {
                stmt.execute(params![
                    symbol.to_ascii_uppercase(),
                    timeframe.as_str(),
                    c.timestamp,
                    c.open,
                    c.high,
                    c.low,
                    c.close,
                    c.volume
                ])?;
            }
        }
        tx.commit()?;
        debug!("stored {} {} candles for {}", candles.len(), timeframe.as_str(), symbol);
        Ok(candles.len())
    }

    fn query(
        conn: &Mutex<Connection>,
        symbol: &str,
        timeframe: Timeframe,
        start: i64,
        end: i64,
    ) -> Result<Vec<Candle>> {
        let conn = Self::lock(conn)?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, open, high, low, close, volume FROM candles
             WHERE symbol = ?1 AND timeframe = ?2 AND timestamp >= ?3 AND timestamp <= ?4
             ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(
            params![symbol.to_ascii_uppercase(), timeframe.as_str(), start, end],
            |row| {
                Ok(Candle {
                    timestamp: row.get(0)?,
                    open: row.get(1)?,
                    high: row.get(2)?,
                    low: row.get(3)?,
                    close: row.get(4)?,
                    volume: row.get(5)?,
                })
            },
        )?;
        let candles = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(candles)
    }
}

#[async_trait]
impl CandleSource for SqliteCandleStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let conn = Arc::clone(&self.conn);
        let symbol = symbol.to_string();
        let (start, end) = (start.timestamp_millis(), end.timestamp_millis());
        tokio::task::spawn_blocking(move || Self::query(&conn, &symbol, timeframe, start, end))
            .await
            .map_err(|e| ForecastError::Internal(format!("candle query task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candles(n: i64) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle::new(i * 60_000, 10.0, 11.0, 9.0, 10.0 + i as f64, 100.0))
            .collect()
    }

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(ms).unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_fetch_in_order() {
        let store = SqliteCandleStore::new_in_memory().unwrap();
        let mut rows = candles(5);
        rows.reverse();
        assert_eq!(store.insert_candles("btcusdt", Timeframe::OneMinute, &rows).unwrap(), 5);

        let got = store
            .fetch("BTCUSDT", Timeframe::OneMinute, at(0), at(10 * 60_000))
            .await
            .unwrap();
        assert_eq!(got, candles(5));
    }

    #[tokio::test]
    async fn test_fetch_respects_range_and_timeframe() {
        let store = SqliteCandleStore::new_in_memory().unwrap();
        store.insert_candles("BTCUSDT", Timeframe::OneMinute, &candles(10)).unwrap();
        store.insert_candles("BTCUSDT", Timeframe::OneHour, &candles(3)).unwrap();

        let got = store
            .fetch("BTCUSDT", Timeframe::OneMinute, at(2 * 60_000), at(4 * 60_000))
            .await
            .unwrap();
        assert_eq!(got.len(), 3);
        let hourly = store
            .fetch("BTCUSDT", Timeframe::OneHour, at(0), at(1_000_000_000))
            .await
            .unwrap();
        assert_eq!(hourly.len(), 3);
    }

    #[tokio::test]
    async fn test_replace_on_duplicate() {
        let store = SqliteCandleStore::new_in_memory().unwrap();
        store.insert_candles("BTCUSDT", Timeframe::OneMinute, &candles(2)).unwrap();
        let updated = vec![Candle::new(0, 1.0, 2.0, 0.5, 1.5, 7.0)];
        store.insert_candles("BTCUSDT", Timeframe::OneMinute, &updated).unwrap();

        let got = store
            .fetch("BTCUSDT", Timeframe::OneMinute, at(0), at(60_000))
            .await
            .unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0], updated[0]);
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("candles.db");
        SqliteCandleStore::new(&path)
            .unwrap()
            .insert_candles("ETHUSDT", Timeframe::OneMinute, &candles(3))
            .unwrap();

        let reopened = SqliteCandleStore::new(&path).unwrap();
        let rows = SqliteCandleStore::query(&reopened.conn, "ETHUSDT", Timeframe::OneMinute, 0, 1_000_000).unwrap();
        assert_eq!(rows.len(), 3);
    }
}
