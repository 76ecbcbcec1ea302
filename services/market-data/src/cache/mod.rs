// Candle persistence: Postgres for deployments, in-memory for tests and DB-less runs
use crate::types::*;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Embedded migrations for the `candlesticks` table
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Store of completed candles keyed by (instrument, granularity, time)
#[async_trait::async_trait]
pub trait CandleCache: Send + Sync {
    /// Candles with `start <= time <= end`, oldest first
    async fn get_candles(
        &self,
        instrument: &Instrument,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;

    /// Upsert candles; returns the number of rows written
    async fn put_candles(
        &self,
        instrument: &Instrument,
        granularity: Granularity,
        candles: &[Candle],
    ) -> Result<usize>;
}

pub struct PgCandleCache {
    pool: PgPool,
}

impl PgCandleCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending migrations
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| MarketDataError::CacheError(e.to_string()))
    }
}

#[async_trait::async_trait]
impl CandleCache for PgCandleCache {
    async fn get_candles(
        &self,
        instrument: &Instrument,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            r#"
            SELECT timestamp, open, high, low, close, volume
            FROM candlesticks
            WHERE instrument = $1 AND granularity = $2
              AND timestamp >= $3 AND timestamp <= $4
            ORDER BY timestamp ASC
            "#,
        )
        .bind(instrument.as_str())
        .bind(granularity.as_str())
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MarketDataError::CacheError(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let volume: Option<i64> = row.try_get("volume")?;
                Ok(Candle {
                    time: row.try_get("timestamp")?,
                    open: row.try_get::<Decimal, _>("open")?,
                    high: row.try_get::<Decimal, _>("high")?,
                    low: row.try_get::<Decimal, _>("low")?,
                    close: row.try_get::<Decimal, _>("close")?,
                    volume: volume.and_then(|v| u64::try_from(v).ok()),
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| MarketDataError::CacheError(e.to_string()))
    }

    async fn put_candles(
        &self,
        instrument: &Instrument,
        granularity: Granularity,
        candles: &[Candle],
    ) -> Result<usize> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MarketDataError::CacheError(e.to_string()))?;

        for candle in candles {
            sqlx::query(
                r#"
                INSERT INTO candlesticks (instrument, granularity, timestamp, open, high, low, close, volume)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (instrument, granularity, timestamp) DO UPDATE
                SET open = EXCLUDED.open,
                    high = EXCLUDED.high,
                    low = EXCLUDED.low,
                    close = EXCLUDED.close,
                    volume = EXCLUDED.volume
                "#,
            )
            .bind(instrument.as_str())
            .bind(granularity.as_str())
            .bind(candle.time)
            .bind(candle.open)
            .bind(candle.high)
            .bind(candle.low)
            .bind(candle.close)
            .bind(candle.volume.and_then(|v| i64::try_from(v).ok()))
            .execute(&mut *tx)
            .await
            .map_err(|e| MarketDataError::CacheError(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| MarketDataError::CacheError(e.to_string()))?;

        Ok(candles.len())
    }
}

/// Process-local cache used when no database is configured
#[derive(Default)]
pub struct MemoryCandleCache {
    series: RwLock<HashMap<(Instrument, Granularity), BTreeMap<DateTime<Utc>, Candle>>>,
}

impl MemoryCandleCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CandleCache for MemoryCandleCache {
    async fn get_candles(
        &self,
        instrument: &Instrument,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        if start > end {
            return Ok(Vec::new());
        }

        let series = self.series.read().await;
        Ok(series
            .get(&(instrument.clone(), granularity))
            .map(|by_time| by_time.range(start..=end).map(|(_, c)| c.clone()).collect())
            .unwrap_or_default())
    }

    async fn put_candles(
        &self,
        instrument: &Instrument,
        granularity: Granularity,
        candles: &[Candle],
    ) -> Result<usize> {
        let mut series = self.series.write().await;
        let by_time = series
            .entry((instrument.clone(), granularity))
            .or_default();

        for candle in candles {
            by_time.insert(candle.time, candle.clone());
        }

        Ok(candles.len())
    }
}
