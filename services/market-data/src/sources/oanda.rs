use crate::types::*;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Instruments this client is allowed to serve, with display names
pub static OANDA_INSTRUMENTS: phf::Map<&'static str, &'static str> = phf::phf_map! {
    "XAU_USD" => "Gold / US Dollar",
    "XAG_USD" => "Silver / US Dollar",
    "EUR_USD" => "Euro / US Dollar",
    "GBP_USD" => "British Pound / US Dollar",
    "USD_JPY" => "US Dollar / Japanese Yen",
};

/// Largest candle count accepted by the candles endpoint
pub const MAX_CANDLE_COUNT: usize = 5000;

const PRACTICE_URL: &str = "https://api-fxpractice.oanda.com";
const LIVE_URL: &str = "https://api-fxtrade.oanda.com";

/// OANDA v20 environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OandaEnvironment {
    Practice,
    Live,
}

impl OandaEnvironment {
    pub fn base_url(&self) -> &'static str {
        match self {
            OandaEnvironment::Practice => PRACTICE_URL,
            OandaEnvironment::Live => LIVE_URL,
        }
    }
}

impl FromStr for OandaEnvironment {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "practice" | "demo" => Ok(OandaEnvironment::Practice),
            "live" | "trade" => Ok(OandaEnvironment::Live),
            other => Err(MarketDataError::ApiError(format!(
                "Unknown OANDA environment: {}",
                other
            ))),
        }
    }
}

/// Request outcomes, read by `health()` without touching the API
#[derive(Default)]
struct RequestStats {
    succeeded: AtomicU64,
    failed: AtomicU64,
    /// Epoch millis, 0 until the first outcome
    success_at_ms: AtomicU64,
    failure_at_ms: AtomicU64,
    total_latency_ms: AtomicU64,
    last_error: std::sync::Mutex<Option<String>>,
}

impl RequestStats {
    fn succeeded(&self, latency: Duration) {
        self.success_at_ms
            .store(Utc::now().timestamp_millis().max(1) as u64, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    fn failed(&self, error: &MarketDataError) {
        self.failure_at_ms
            .store(Utc::now().timestamp_millis().max(1) as u64, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(error.to_string());
        }
    }

    fn snapshot(&self) -> SourceHealth {
        let ok = self.succeeded.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let success_at = self.success_at_ms.load(Ordering::Relaxed);
        let failure_at = self.failure_at_ms.load(Ordering::Relaxed);

        // healthy once the latest outcome is a success
        let is_healthy = success_at > 0 && success_at >= failure_at;
        let last_error = if is_healthy {
            None
        } else {
            self.last_error.lock().ok().and_then(|e| e.clone())
        };

        SourceHealth {
            source: "oanda".to_string(),
            is_healthy,
            last_success: (success_at > 0)
                .then(|| DateTime::from_timestamp_millis(success_at as i64))
                .flatten(),
            last_error,
            success_rate_24h: if ok + failed == 0 {
                1.0
            } else {
                ok as f64 / (ok + failed) as f64
            },
            avg_latency_ms: self
                .total_latency_ms
                .load(Ordering::Relaxed)
                .checked_div(ok)
                .unwrap_or(0),
        }
    }
}

/// OANDA v20 REST client for candles and pricing
pub struct OandaClient {
    client: Client,
    base_url: String,
    api_key: String,
    account_id: String,
    in_flight: Semaphore,
    last_request: tokio::sync::Mutex<Option<Instant>>,
    stats: RequestStats,
}

impl OandaClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
    const MAX_RETRY_AFTER_SECS: u64 = 120;
    /// 100 requests/second
    const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(10);
    const MAX_CONCURRENT: usize = 10;

    pub fn new(
        api_key: impl Into<String>,
        account_id: impl Into<String>,
        environment: OandaEnvironment,
    ) -> Result<Self> {
        Self::with_base_url(api_key, account_id, environment.base_url())
    }

    /// Point the client at a custom host (tests, proxies)
    pub fn with_base_url(
        api_key: impl Into<String>,
        account_id: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(Self::MAX_CONCURRENT)
            .build()
            .map_err(|e| MarketDataError::ApiError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            account_id: account_id.into(),
            in_flight: Semaphore::new(Self::MAX_CONCURRENT),
            last_request: tokio::sync::Mutex::new(None),
            stats: RequestStats::default(),
        })
    }

    pub fn supports_instrument(instrument: &Instrument) -> bool {
        OANDA_INSTRUMENTS.contains_key(instrument.as_str())
    }

    fn ensure_supported(instrument: &Instrument) -> Result<()> {
        if Self::supports_instrument(instrument) {
            Ok(())
        } else {
            Err(MarketDataError::InstrumentNotSupported(
                instrument.to_string(),
            ))
        }
    }

    /// GET `endpoint` and decode the JSON body, recording the outcome
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let started = Instant::now();
        let outcome = self.send_with_retry(endpoint, query).await;
        match &outcome {
            Ok(_) => self.stats.succeeded(started.elapsed()),
            Err(e) => self.stats.failed(e),
        }
        outcome
    }

    /// Paced, bounded-concurrency GET; a 429 is retried once after `Retry-After`
    async fn send_with_retry<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut rate_limited_once = false;

        loop {
            let _permit = self
                .in_flight
                .acquire()
                .await
                .map_err(|e| MarketDataError::ApiError(e.to_string()))?;
            self.pace().await;

            debug!("OANDA GET {}", endpoint);
            let request = self
                .client
                .get(&url)
                .bearer_auth(&self.api_key)
                .header("Accept-Datetime-Format", "RFC3339")
                .query(query)
                .send();

            let response = tokio::time::timeout(Self::REQUEST_TIMEOUT, request)
                .await
                .map_err(|_| {
                    MarketDataError::ApiError(format!(
                        "OANDA request to {} timed out after {:?}",
                        endpoint,
                        Self::REQUEST_TIMEOUT
                    ))
                })?
                .map_err(|e| MarketDataError::ApiError(e.to_string()))?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok());

                if rate_limited_once {
                    return Err(MarketDataError::RateLimit {
                        source_name: "oanda".to_string(),
                        retry_after,
                    });
                }
                rate_limited_once = true;

                let wait = retry_after.unwrap_or(1).min(Self::MAX_RETRY_AFTER_SECS);
                warn!("OANDA rate limited on {}, retrying in {}s", endpoint, wait);
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(MarketDataError::ApiError(format!(
                    "OANDA returned {} for {}: {}",
                    status, endpoint, body
                )));
            }

            return response
                .json::<T>()
                .await
                .map_err(|e| MarketDataError::InvalidResponse(e.to_string()));
        }
    }

    /// Keep at least `MIN_REQUEST_INTERVAL` between request starts
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let since = previous.elapsed();
            if since < Self::MIN_REQUEST_INTERVAL {
                tokio::time::sleep(Self::MIN_REQUEST_INTERVAL - since).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Most recent completed mid-price candles, oldest first.
    ///
    /// The still-forming candle is dropped, so fewer than `count` candles
    /// may come back.
    pub async fn get_candles(
        &self,
        instrument: &Instrument,
        granularity: Granularity,
        count: usize,
    ) -> Result<Vec<Candle>> {
        Self::ensure_supported(instrument)?;
        if count == 0 || count > MAX_CANDLE_COUNT {
            return Err(MarketDataError::InvalidCount(count));
        }

        let endpoint = format!("/v3/instruments/{}/candles", instrument);
        let query = [
            ("count", count.to_string()),
            ("granularity", granularity.as_str().to_string()),
            ("price", "M".to_string()),
        ];

        let response: CandlesResponse = self.get_json(&endpoint, &query).await?;

        let mut candles = Vec::with_capacity(response.candles.len());
        for raw in response.candles.into_iter().filter(|c| c.complete) {
            match raw.into_candle() {
                Ok(candle) => candles.push(candle),
                Err(e) => warn!("Skipping malformed {} candle for {}: {}", granularity, instrument, e),
            }
        }

        debug!(
            "Fetched {} complete {} candles for {}",
            candles.len(),
            granularity,
            instrument
        );

        Ok(candles)
    }

    /// Current ask price from the account pricing endpoint
    pub async fn get_current_price(&self, instrument: &Instrument) -> Result<Quote> {
        Self::ensure_supported(instrument)?;

        let endpoint = format!("/v3/accounts/{}/pricing", self.account_id);
        let query = [("instruments", instrument.to_string())];

        let response: PricingResponse = self.get_json(&endpoint, &query).await?;

        let price = response
            .prices
            .into_iter()
            .next()
            .ok_or_else(|| MarketDataError::InvalidResponse("No prices returned".to_string()))?;

        let ask = price
            .asks
            .first()
            .ok_or_else(|| MarketDataError::InvalidResponse("No ask price returned".to_string()))?;

        let bid = match price.bids.first() {
            Some(level) => Some(parse_price(&level.price)?),
            None => None,
        };

        Ok(Quote {
            instrument: instrument.clone(),
            bid,
            ask: parse_price(&ask.price)?,
            source: "oanda".to_string(),
            timestamp: price.time.unwrap_or_else(Utc::now),
        })
    }

    /// Health from recorded request outcomes
    pub async fn health(&self) -> SourceHealth {
        self.stats.snapshot()
    }
}

fn parse_price(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw)
        .map_err(|e| MarketDataError::InvalidResponse(format!("Bad price '{}': {}", raw, e)))
}

#[derive(Debug, Deserialize)]
struct CandlesResponse {
    candles: Vec<RawCandle>,
}

#[derive(Debug, Deserialize)]
struct RawCandle {
    #[serde(default)]
    complete: bool,
    time: DateTime<Utc>,
    #[serde(default)]
    volume: Option<u64>,
    mid: Option<RawOhlc>,
}

impl RawCandle {
    fn into_candle(self) -> Result<Candle> {
        let mid = self.mid.ok_or_else(|| {
            MarketDataError::InvalidResponse(format!("candle at {} has no mid prices", self.time))
        })?;

        Ok(Candle {
            time: self.time,
            open: parse_price(&mid.o)?,
            high: parse_price(&mid.h)?,
            low: parse_price(&mid.l)?,
            close: parse_price(&mid.c)?,
            volume: self.volume,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawOhlc {
    o: String,
    h: String,
    l: String,
    c: String,
}

#[derive(Debug, Deserialize)]
struct PricingResponse {
    prices: Vec<RawPrice>,
}

#[derive(Debug, Deserialize)]
struct RawPrice {
    #[serde(default)]
    asks: Vec<PriceLevel>,
    #[serde(default)]
    bids: Vec<PriceLevel>,
    time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct PriceLevel {
    price: String,
}

#[async_trait::async_trait]
impl CandleSource for OandaClient {
    async fn get_candles(
        &self,
        instrument: &Instrument,
        granularity: Granularity,
        count: usize,
    ) -> Result<Vec<Candle>> {
        OandaClient::get_candles(self, instrument, granularity, count).await
    }

    async fn get_current_price(&self, instrument: &Instrument) -> Result<Quote> {
        OandaClient::get_current_price(self, instrument).await
    }

    async fn health(&self) -> SourceHealth {
        OandaClient::health(self).await
    }

    fn name(&self) -> &str {
        "oanda"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn xau() -> Instrument {
        Instrument::parse("XAU_USD").unwrap()
    }

    #[tokio::test]
    async fn test_get_candles_skips_incomplete_and_malformed() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v3/instruments/XAU_USD/candles"))
            .and(query_param("granularity", "M5"))
            .and(query_param("count", "3"))
            .and(query_param("price", "M"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "instrument": "XAU_USD",
                "granularity": "M5",
                "candles": [
                    {
                        "complete": true,
                        "volume": 120,
                        "time": "2024-03-01T10:00:00.000000000Z",
                        "mid": {"o": "2050.10", "h": "2052.00", "l": "2049.50", "c": "2051.25"}
                    },
                    {
                        "complete": true,
                        "volume": 98,
                        "time": "2024-03-01T10:05:00.000000000Z",
                        "mid": {"o": "2051.25", "h": "2053.40", "l": "2050.90", "c": "2053.00"}
                    },
                    {
                        "complete": true,
                        "volume": 5,
                        "time": "2024-03-01T10:07:00.000000000Z",
                        "mid": {"o": "n/a", "h": "2053.40", "l": "2050.90", "c": "2053.00"}
                    },
                    {
                        "complete": false,
                        "volume": 12,
                        "time": "2024-03-01T10:10:00.000000000Z",
                        "mid": {"o": "2053.00", "h": "2053.10", "l": "2052.80", "c": "2052.90"}
                    }
                ]
            })))
            .mount(&server)
            .await;

        let client = OandaClient::with_base_url("test-key", "101-001", server.uri()).unwrap();
        let candles = client.get_candles(&xau(), Granularity::M5, 3).await.unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open, Decimal::from_str("2050.10").unwrap());
        assert_eq!(candles[1].close, Decimal::from_str("2053.00").unwrap());
        assert_eq!(candles[1].volume, Some(98));
        assert!(candles[0].time < candles[1].time);
        assert!(client.health().await.is_healthy);
    }

    #[tokio::test]
    async fn test_get_current_price_uses_first_ask() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v3/accounts/101-001/pricing"))
            .and(query_param("instruments", "XAU_USD"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "prices": [{
                    "instrument": "XAU_USD",
                    "time": "2024-03-01T10:07:31.123456789Z",
                    "asks": [{"price": "2052.95", "liquidity": 250000}],
                    "bids": [{"price": "2052.55", "liquidity": 250000}]
                }]
            })))
            .mount(&server)
            .await;

        let client = OandaClient::with_base_url("test-key", "101-001", server.uri()).unwrap();
        let quote = client.get_current_price(&xau()).await.unwrap();

        assert_eq!(quote.ask, Decimal::from_str("2052.95").unwrap());
        assert_eq!(quote.bid, Some(Decimal::from_str("2052.55").unwrap()));
        assert_eq!(quote.source, "oanda");
    }

    #[tokio::test]
    async fn test_api_error_marks_unhealthy() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Insufficient authorization"))
            .mount(&server)
            .await;

        let client = OandaClient::with_base_url("bad-key", "101-001", server.uri()).unwrap();
        let err = client
            .get_candles(&xau(), Granularity::H1, 10)
            .await
            .unwrap_err();

        assert!(matches!(err, MarketDataError::ApiError(ref msg) if msg.contains("401")));

        let health = client.health().await;
        assert!(!health.is_healthy);
        assert_eq!(health.success_rate_24h, 0.0);
        assert!(health.last_error.unwrap().contains("Insufficient authorization"));
    }

    fn pricing_body() -> serde_json::Value {
        json!({
            "prices": [{
                "instrument": "XAU_USD",
                "asks": [{"price": "2052.95"}],
                "bids": []
            }]
        })
    }

    #[tokio::test]
    async fn test_rate_limit_retried_once() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v3/accounts/101-001/pricing"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/accounts/101-001/pricing"))
            .respond_with(ResponseTemplate::new(200).set_body_json(pricing_body()))
            .mount(&server)
            .await;

        let client = OandaClient::with_base_url("test-key", "101-001", server.uri()).unwrap();
        let quote = assert_ok!(client.get_current_price(&xau()).await);

        assert_eq!(quote.bid, None);
        assert!(client.health().await.is_healthy);
    }

    #[tokio::test]
    async fn test_rate_limit_gives_up_after_retry() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .expect(2)
            .mount(&server)
            .await;

        let client = OandaClient::with_base_url("test-key", "101-001", server.uri()).unwrap();
        let err = assert_err!(client.get_current_price(&xau()).await);

        assert!(matches!(
            err,
            MarketDataError::RateLimit { retry_after: Some(0), .. }
        ));
    }

    #[tokio::test]
    async fn test_rejects_unsupported_instrument_and_count() {
        let client = OandaClient::with_base_url("k", "a", "http://127.0.0.1:9").unwrap();

        let btc = Instrument::parse("BTC_USD").unwrap();
        assert!(matches!(
            client.get_candles(&btc, Granularity::M5, 10).await,
            Err(MarketDataError::InstrumentNotSupported(_))
        ));
        assert!(matches!(
            client.get_candles(&xau(), Granularity::M5, 0).await,
            Err(MarketDataError::InvalidCount(0))
        ));
        assert!(matches!(
            client.get_candles(&xau(), Granularity::M5, 5001).await,
            Err(MarketDataError::InvalidCount(5001))
        ));
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!(
            "practice".parse::<OandaEnvironment>().unwrap().base_url(),
            PRACTICE_URL
        );
        assert_eq!("LIVE".parse::<OandaEnvironment>().unwrap(), OandaEnvironment::Live);
        assert!("staging".parse::<OandaEnvironment>().is_err());
    }
}
