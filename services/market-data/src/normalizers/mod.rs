// Normalization of candle series coming from sources or the cache
use crate::types::*;
use rust_decimal::Decimal;
use tracing::warn;

/// Validate that a candle is usable (positive prices, consistent OHLC)
pub fn validate_candle(candle: &Candle) -> Result<()> {
    if candle.low <= Decimal::ZERO {
        return Err(MarketDataError::InvalidCandle(format!(
            "non-positive price at {}",
            candle.time
        )));
    }

    if !candle.is_well_formed() {
        return Err(MarketDataError::InvalidCandle(format!(
            "inconsistent OHLC at {}: o={} h={} l={} c={}",
            candle.time, candle.open, candle.high, candle.low, candle.close
        )));
    }

    Ok(())
}

/// Drop malformed candles, sort ascending by time and drop duplicate
/// timestamps (last one wins)
pub fn normalize_series(candles: Vec<Candle>) -> Vec<Candle> {
    let mut candles: Vec<Candle> = candles
        .into_iter()
        .filter(|candle| match validate_candle(candle) {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping candle: {}", e);
                false
            }
        })
        .collect();

    // Stable sort keeps arrival order among equal timestamps
    candles.sort_by_key(|c| c.time);

    let mut normalized: Vec<Candle> = Vec::with_capacity(candles.len());
    for candle in candles {
        match normalized.last_mut() {
            Some(last) if last.time == candle.time => *last = candle,
            _ => normalized.push(candle),
        }
    }

    normalized
}

/// Keep only the newest `count` candles of an ascending series
pub fn take_latest(mut candles: Vec<Candle>, count: usize) -> Vec<Candle> {
    if candles.len() > count {
        candles.drain(..candles.len() - count);
    }
    candles
}
