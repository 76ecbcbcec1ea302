//! Trend Identification
//!
//! Classifies a series with graduated data requirements:
//! - 50+ candles: SMA(20) vs SMA(50) with a higher-highs / lower-lows check
//! - 20-49 candles: price vs SMA(20) with a range-based strength check
//! - 5-19 candles: first vs last close with the same strength check
//! - fewer than 5: neutral

use super::{mean, validate_series, Result};
use market_data::Candle;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

const SMA_SHORT_PERIOD: usize = 20;
const SMA_LONG_PERIOD: usize = 50;
const MIN_CANDLES: usize = 5;
/// Candles compared for higher highs / lower lows: the last 5 against the 5 before
const STRENGTH_WINDOW: usize = 10;
/// SMA(20) slope in the crossover zone is taken over this many samples,
/// i.e. against the average ending 4 candles ago
const SLOPE_LOOKBACK: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendStrength {
    Weak,
    Strong,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendInfo {
    pub direction: TrendDirection,
    pub strength: TrendStrength,
    pub current_price: Decimal,
    pub sma_short: Option<Decimal>,
    pub sma_long: Option<Decimal>,
}

/// Simple moving average of the last `period` closes ending at `end` (exclusive)
fn sma_ending_at(candles: &[Candle], end: usize, period: usize) -> Option<Decimal> {
    if period == 0 || end < period || end > candles.len() {
        return None;
    }
    mean(candles[end - period..end].iter().map(|c| c.close))
}

/// Crossover band: 0.05% of the current price
fn crossover_band(current_price: Decimal) -> Decimal {
    current_price * Decimal::new(5, 4)
}

/// At least 3 of the last 5 values beat their counterpart 5 candles earlier
fn majority_beats(recent: &[Decimal], beats: impl Fn(Decimal, Decimal) -> bool) -> bool {
    if recent.len() < STRENGTH_WINDOW {
        return false;
    }
    let n = recent.len();
    let latest = &recent[n - 5..];
    let earlier = &recent[n - 10..n - 5];
    latest
        .iter()
        .zip(earlier)
        .filter(|(now, before)| beats(**now, **before))
        .count()
        >= 3
}

/// Net move is larger than twice the average candle range
fn is_strong_move(candles: &[Candle], change: Decimal) -> bool {
    match mean(candles.iter().map(|c| c.range())) {
        Some(avg_range) => change.abs() > avg_range * Decimal::TWO,
        None => false,
    }
}

fn direction_from_sign(delta: Decimal) -> TrendDirection {
    if delta > Decimal::ZERO {
        TrendDirection::Bullish
    } else if delta < Decimal::ZERO {
        TrendDirection::Bearish
    } else {
        TrendDirection::Neutral
    }
}

fn classify_with_both_smas(
    candles: &[Candle],
    current_price: Decimal,
    sma_short: Decimal,
    sma_long: Decimal,
) -> (TrendDirection, TrendStrength) {
    let recent = &candles[candles.len().saturating_sub(STRENGTH_WINDOW)..];

    if sma_short > sma_long && current_price > sma_short {
        let highs: Vec<Decimal> = recent.iter().map(|c| c.high).collect();
        let strength = if majority_beats(&highs, |now, before| now > before) {
            TrendStrength::Strong
        } else {
            TrendStrength::Weak
        };
        return (TrendDirection::Bullish, strength);
    }

    if sma_short < sma_long && current_price < sma_short {
        let lows: Vec<Decimal> = recent.iter().map(|c| c.low).collect();
        let strength = if majority_beats(&lows, |now, before| now < before) {
            TrendStrength::Strong
        } else {
            TrendStrength::Weak
        };
        return (TrendDirection::Bearish, strength);
    }

    if (sma_short - sma_long).abs() < crossover_band(current_price) {
        let earlier = sma_ending_at(
            candles,
            candles.len() + 1 - SLOPE_LOOKBACK,
            SMA_SHORT_PERIOD,
        );
        if let Some(earlier) = earlier {
            return (direction_from_sign(sma_short - earlier), TrendStrength::Weak);
        }
    }

    (TrendDirection::Neutral, TrendStrength::Weak)
}

/// Classify trend direction and strength.
///
/// Fails only on an empty or malformed series; short series degrade to a
/// lower-confidence classification or to neutral.
pub fn identify_trend(candles: &[Candle]) -> Result<TrendInfo> {
    validate_series(candles)?;

    let n = candles.len();
    let current_price = candles[n - 1].close;
    let sma_short = sma_ending_at(candles, n, SMA_SHORT_PERIOD);
    let sma_long = sma_ending_at(candles, n, SMA_LONG_PERIOD);

    let (direction, strength) = match (sma_short, sma_long) {
        (Some(short), Some(long)) => classify_with_both_smas(candles, current_price, short, long),
        (Some(short), None) => {
            let direction = direction_from_sign(current_price - short);
            let change = current_price - candles[n - SMA_SHORT_PERIOD].close;
            let strength = if is_strong_move(candles, change) {
                TrendStrength::Strong
            } else {
                TrendStrength::Weak
            };
            (direction, strength)
        }
        _ if n >= MIN_CANDLES => {
            let change = current_price - candles[0].close;
            let direction = direction_from_sign(change);
            let strength = if is_strong_move(candles, change) {
                TrendStrength::Strong
            } else {
                TrendStrength::Weak
            };
            (direction, strength)
        }
        _ => (TrendDirection::Neutral, TrendStrength::Weak),
    };

    info!(
        "Trend over {} candles: {:?} ({:?}), price {}, sma20 {:?}, sma50 {:?}",
        n, direction, strength, current_price, sma_short, sma_long
    );

    Ok(TrendInfo {
        direction,
        strength,
        current_price,
        sma_short,
        sma_long,
    })
}
