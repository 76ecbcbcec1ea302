use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Brokerage instrument symbol in `BASE_QUOTE` form (e.g. "XAU_USD")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Instrument(String);

impl Instrument {
    /// Parse and normalize an instrument symbol.
    ///
    /// Accepts "XAU_USD", "XAUUSD", "xau/usd" and "XAU-USD".
    pub fn parse(symbol: &str) -> Result<Self> {
        let normalized = symbol.trim().to_uppercase().replace(['/', '-'], "_");

        let normalized = if !normalized.contains('_') && normalized.len() == 6 {
            format!("{}_{}", &normalized[..3], &normalized[3..])
        } else {
            normalized
        };

        let mut parts = normalized.split('_');
        let valid = match (parts.next(), parts.next(), parts.next()) {
            (Some(base), Some(quote), None) => {
                !base.is_empty()
                    && !quote.is_empty()
                    && base.chars().all(|c| c.is_ascii_alphanumeric())
                    && quote.chars().all(|c| c.is_ascii_alphanumeric())
            }
            _ => false,
        };

        if !valid {
            return Err(MarketDataError::InstrumentNotSupported(symbol.to_string()));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Symbol without separator, as shown to users ("XAUUSD")
    pub fn display_symbol(&self) -> String {
        self.0.replace('_', "")
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Candle granularities exposed by the API (OANDA codes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    M5,
    M15,
    M30,
    H1,
    H4,
    D,
}

impl Granularity {
    pub const ALL: [Granularity; 6] = [
        Granularity::M5,
        Granularity::M15,
        Granularity::M30,
        Granularity::H1,
        Granularity::H4,
        Granularity::D,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::M5 => "M5",
            Granularity::M15 => "M15",
            Granularity::M30 => "M30",
            Granularity::H1 => "H1",
            Granularity::H4 => "H4",
            Granularity::D => "D",
        }
    }

    pub fn to_seconds(&self) -> i64 {
        match self {
            Granularity::M5 => 300,
            Granularity::M15 => 900,
            Granularity::M30 => 1800,
            Granularity::H1 => 3600,
            Granularity::H4 => 14400,
            Granularity::D => 86400,
        }
    }

    /// Human readable label used in prompts ("M5 (5-minute candles)")
    pub fn describe(&self) -> &'static str {
        match self {
            Granularity::M5 => "M5 (5-minute candles)",
            Granularity::M15 => "M15 (15-minute candles)",
            Granularity::M30 => "M30 (30-minute candles)",
            Granularity::H1 => "H1 (1-hour candles)",
            Granularity::H4 => "H4 (4-hour candles)",
            Granularity::D => "D (daily candles)",
        }
    }
}

impl Default for Granularity {
    fn default() -> Self {
        Granularity::M5
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self> {
        Granularity::ALL
            .iter()
            .copied()
            .find(|g| g.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| MarketDataError::UnsupportedGranularity(s.to_string()))
    }
}

/// OHLC candle for one interval of one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u64>,
}

impl Candle {
    /// High minus low
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    /// Positive prices and `low <= min(open, close) <= max(open, close) <= high`
    pub fn is_well_formed(&self) -> bool {
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);

        self.open > Decimal::ZERO
            && self.high > Decimal::ZERO
            && self.low > Decimal::ZERO
            && self.close > Decimal::ZERO
            && self.low <= body_low
            && self.high >= body_high
    }
}

/// Latest quote for an instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub instrument: Instrument,
    pub bid: Option<Decimal>,
    pub ask: Decimal,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

/// Data source health/status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceHealth {
    pub source: String,
    pub is_healthy: bool,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub success_rate_24h: f64,
    pub avg_latency_ms: u64,
}

/// Error types for market data retrieval
#[derive(Debug, thiserror::Error)]
pub enum MarketDataError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Rate limit exceeded for {source_name}")]
    RateLimit {
        source_name: String,
        retry_after: Option<u64>,
    },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Instrument not supported: {0}")]
    InstrumentNotSupported(String),

    #[error("Unsupported granularity: {0}")]
    UnsupportedGranularity(String),

    #[error("Invalid candle count {0}, must be between 1 and 5000")]
    InvalidCount(usize),

    #[error("Invalid candle: {0}")]
    InvalidCandle(String),

    #[error("Cache error: {0}")]
    CacheError(String),
}

/// Result type for market data operations
pub type Result<T> = std::result::Result<T, MarketDataError>;

/// Trait for candle data sources
#[async_trait::async_trait]
pub trait CandleSource: Send + Sync {
    /// Get the most recent completed candles, ascending by time
    async fn get_candles(
        &self,
        instrument: &Instrument,
        granularity: Granularity,
        count: usize,
    ) -> Result<Vec<Candle>>;

    /// Get the current quote
    async fn get_current_price(&self, instrument: &Instrument) -> Result<Quote>;

    /// Get source health status
    async fn health(&self) -> SourceHealth;

    /// Source name
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_normalization() {
        assert_eq!(Instrument::parse("XAU_USD").unwrap().as_str(), "XAU_USD");
        assert_eq!(Instrument::parse("xauusd").unwrap().as_str(), "XAU_USD");
        assert_eq!(Instrument::parse("EUR/USD").unwrap().as_str(), "EUR_USD");
        assert_eq!(Instrument::parse("XAU_USD").unwrap().display_symbol(), "XAUUSD");
        assert!(Instrument::parse("").is_err());
        assert!(Instrument::parse("XAU_USD_EUR").is_err());
        assert!(Instrument::parse("GOLD").is_err());
    }

    #[test]
    fn test_granularity_parsing() {
        assert_eq!("m5".parse::<Granularity>().unwrap(), Granularity::M5);
        assert_eq!("H4".parse::<Granularity>().unwrap(), Granularity::H4);
        assert_eq!(Granularity::D.to_seconds(), 86400);
        assert!("M1".parse::<Granularity>().is_err());
    }

    #[test]
    fn test_candle_well_formed() {
        let mut candle = Candle {
            time: Utc::now(),
            open: Decimal::from(100),
            high: Decimal::from(105),
            low: Decimal::from(98),
            close: Decimal::from(103),
            volume: Some(10),
        };
        assert!(candle.is_well_formed());
        assert_eq!(candle.range(), Decimal::from(7));

        candle.high = Decimal::from(102);
        assert!(!candle.is_well_formed(), "high below close");

        candle.high = Decimal::from(105);
        candle.low = Decimal::ZERO;
        assert!(!candle.is_well_formed(), "non-positive low");
    }
}
