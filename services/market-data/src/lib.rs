pub mod types;
pub mod sources {
    pub mod oanda;
}
pub mod normalizers;
pub mod cache;

pub use cache::{CandleCache, MemoryCandleCache, PgCandleCache};
pub use sources::oanda::{OandaClient, OandaEnvironment, MAX_CANDLE_COUNT};
pub use types::*;

use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A normalized candle series plus where it came from
#[derive(Debug, Clone, Serialize)]
pub struct CandleSeries {
    pub instrument: Instrument,
    pub granularity: Granularity,
    pub candles: Vec<Candle>,
    /// Name of the live source, or "cache" when served from the fallback
    pub source: String,
}

/// Candle retrieval with write-through caching and cache fallback
pub struct CandleFeed {
    source: Arc<dyn CandleSource>,
    cache: Option<Arc<dyn CandleCache>>,
}

impl CandleFeed {
    pub fn new(source: Arc<dyn CandleSource>) -> Self {
        Self {
            source,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CandleCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Latest `count` completed candles, oldest first.
    ///
    /// Fresh candles are written to the cache; a cache write failure is
    /// logged and ignored. When the source fails, candles stored within the
    /// last `count` intervals are served instead.
    pub async fn latest(
        &self,
        instrument: &Instrument,
        granularity: Granularity,
        count: usize,
    ) -> Result<CandleSeries> {
        match self.source.get_candles(instrument, granularity, count).await {
            Ok(raw) => {
                let candles = normalizers::normalize_series(raw);
                debug!(
                    "{} returned {} {} candles for {}",
                    self.source.name(),
                    candles.len(),
                    granularity,
                    instrument
                );

                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.put_candles(instrument, granularity, &candles).await {
                        warn!("Failed to cache candles for {}: {}", instrument, e);
                    }
                }

                Ok(CandleSeries {
                    instrument: instrument.clone(),
                    granularity,
                    candles,
                    source: self.source.name().to_string(),
                })
            }
            Err(source_err) => {
                let Some(cache) = &self.cache else {
                    return Err(source_err);
                };

                warn!(
                    "{} failed for {} {}: {}, trying cache",
                    self.source.name(),
                    instrument,
                    granularity,
                    source_err
                );

                let end = Utc::now();
                let lookback = Duration::seconds(granularity.to_seconds() * count as i64);
                let cached = match cache
                    .get_candles(instrument, granularity, end - lookback, end)
                    .await
                {
                    Ok(cached) => cached,
                    Err(cache_err) => {
                        warn!("Cache lookup failed: {}", cache_err);
                        return Err(source_err);
                    }
                };

                if cached.is_empty() {
                    return Err(source_err);
                }

                let candles = normalizers::take_latest(normalizers::normalize_series(cached), count);
                info!(
                    "Serving {} cached {} candles for {}",
                    candles.len(),
                    granularity,
                    instrument
                );

                Ok(CandleSeries {
                    instrument: instrument.clone(),
                    granularity,
                    candles,
                    source: "cache".to_string(),
                })
            }
        }
    }

    pub async fn current_price(&self, instrument: &Instrument) -> Result<Quote> {
        self.source.get_current_price(instrument).await
    }

    pub async fn health(&self) -> SourceHealth {
        self.source.health().await
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubSource {
        candles: Vec<Candle>,
        fail: AtomicBool,
    }

    #[async_trait::async_trait]
    impl CandleSource for StubSource {
        async fn get_candles(
            &self,
            _instrument: &Instrument,
            _granularity: Granularity,
            count: usize,
        ) -> Result<Vec<Candle>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(MarketDataError::ApiError("upstream down".to_string()));
            }
            Ok(normalizers::take_latest(self.candles.clone(), count))
        }

        async fn get_current_price(&self, instrument: &Instrument) -> Result<Quote> {
            Ok(Quote {
                instrument: instrument.clone(),
                bid: None,
                ask: Decimal::from(2000),
                source: "stub".to_string(),
                timestamp: Utc::now(),
            })
        }

        async fn health(&self) -> SourceHealth {
            SourceHealth {
                source: "stub".to_string(),
                is_healthy: !self.fail.load(Ordering::SeqCst),
                last_success: None,
                last_error: None,
                success_rate_24h: 1.0,
                avg_latency_ms: 0,
            }
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    fn recent_candles(n: i64) -> Vec<Candle> {
        let now = Utc::now();
        // Newest first to check that the feed sorts
        (0..n)
            .map(|i| {
                let price = Decimal::from(2000 + i);
                Candle {
                    time: now - Duration::minutes(5 * (i + 1)) + Duration::seconds(30),
                    open: price,
                    high: price + Decimal::ONE,
                    low: price - Decimal::ONE,
                    close: price,
                    volume: None,
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_latest_writes_through_and_falls_back() {
        let source = Arc::new(StubSource {
            candles: recent_candles(6),
            fail: AtomicBool::new(false),
        });
        let cache = Arc::new(MemoryCandleCache::new());
        let feed = CandleFeed::new(source.clone()).with_cache(cache.clone());
        let xau = Instrument::parse("XAU_USD").unwrap();

        let live = feed.latest(&xau, Granularity::M5, 6).await.unwrap();
        assert_eq!(live.source, "stub");
        assert_eq!(live.candles.len(), 6);
        assert!(live.candles.windows(2).all(|w| w[0].time < w[1].time));

        source.fail.store(true, Ordering::SeqCst);
        let fallback = feed.latest(&xau, Granularity::M5, 4).await.unwrap();
        assert_eq!(fallback.source, "cache");
        assert_eq!(fallback.candles.len(), 4);
        assert_eq!(fallback.candles.last(), live.candles.last());
    }

    #[tokio::test]
    async fn test_latest_without_cache_propagates_error() {
        let source = Arc::new(StubSource {
            candles: Vec::new(),
            fail: AtomicBool::new(true),
        });
        let feed = CandleFeed::new(source);
        let xau = Instrument::parse("XAU_USD").unwrap();

        assert!(matches!(
            feed.latest(&xau, Granularity::H1, 10).await,
            Err(MarketDataError::ApiError(_))
        ));
        assert!(!feed.health().await.is_healthy);
    }
}
