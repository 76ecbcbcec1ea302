//! Fibonacci retracements and the OTE zone
//!
//! The OTE band is the 61.8%-78.6% retracement with entry at 70.5%.

use super::structure::StructurePoints;
use super::trend::TrendDirection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Level labels in ascending ratio order
pub const FIB_LABELS: [&str; 10] = [
    "0.0", "0.236", "0.382", "0.5", "0.618", "0.705", "0.786", "1.0", "1.272", "1.618",
];

/// (label, mantissa, scale) so ratios stay exact
const FIB_RATIOS: [(&str, i64, u32); 10] = [
    ("0.0", 0, 0),
    ("0.236", 236, 3),
    ("0.382", 382, 3),
    ("0.5", 5, 1),
    ("0.618", 618, 3),
    ("0.705", 705, 3),
    ("0.786", 786, 3),
    ("1.0", 1, 0),
    ("1.272", 1272, 3),
    ("1.618", 1618, 3),
];

/// Stop distance beyond the swing extreme ("3 pips" on the quoted instrument)
pub fn default_stop_offset() -> Decimal {
    Decimal::new(3, 4)
}

/// Absolute price per Fibonacci ratio label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FibonacciLevels(BTreeMap<String, Decimal>);

impl FibonacciLevels {
    pub fn get(&self, label: &str) -> Option<Decimal> {
        self.0.get(label).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Decimal)> {
        self.0.iter().map(|(label, price)| (label.as_str(), *price))
    }
}

/// `start + (end - start) * ratio` for every ratio
pub fn calculate_fibonacci_levels(start: Decimal, end: Decimal) -> FibonacciLevels {
    let range = end - start;
    FibonacciLevels(
        FIB_RATIOS
            .iter()
            .map(|&(label, mantissa, scale)| {
                (label.to_string(), start + range * Decimal::new(mantissa, scale))
            })
            .collect(),
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OteZone {
    /// 61.8% level
    pub zone_start: Decimal,
    /// 78.6% level
    pub zone_end: Decimal,
    /// 70.5% level
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    /// 1:1 risk/reward target
    pub take_profit_1: Decimal,
    /// The opposite structural extreme
    pub take_profit_2: Decimal,
    pub fib_levels: FibonacciLevels,
}

/// OTE zone with the default stop offset
pub fn calculate_ote_zone(direction: TrendDirection, structure: &StructurePoints) -> Option<OteZone> {
    calculate_ote_zone_with_offset(direction, structure, default_stop_offset())
}

/// OTE zone from the most recent swing low and swing high.
///
/// `None` when the trend is neutral or either side has no swing point.
pub fn calculate_ote_zone_with_offset(
    direction: TrendDirection,
    structure: &StructurePoints,
    stop_offset: Decimal,
) -> Option<OteZone> {
    let zone = build_zone(direction, structure, stop_offset);
    if zone.is_none() {
        warn!(
            "No OTE zone: direction {:?}, {} swing highs, {} swing lows",
            direction,
            structure.swing_highs.len(),
            structure.swing_lows.len()
        );
    }
    zone
}

fn build_zone(
    direction: TrendDirection,
    structure: &StructurePoints,
    stop_offset: Decimal,
) -> Option<OteZone> {
    let swing_low = structure.swing_lows.last()?.price;
    let swing_high = structure.swing_highs.last()?.price;

    let (fib_levels, stop_loss, take_profit_2) = match direction {
        TrendDirection::Bullish => (
            calculate_fibonacci_levels(swing_low, swing_high),
            swing_low - stop_offset,
            swing_high,
        ),
        TrendDirection::Bearish => (
            calculate_fibonacci_levels(swing_high, swing_low),
            swing_high + stop_offset,
            swing_low,
        ),
        TrendDirection::Neutral => return None,
    };

    let entry_price = fib_levels.get("0.705")?;
    // signed risk for bullish, absolute for bearish
    let take_profit_1 = match direction {
        TrendDirection::Bullish => entry_price + (entry_price - stop_loss),
        _ => entry_price - (entry_price - stop_loss).abs(),
    };

    debug!(
        "OTE {:?}: entry {} stop {} tp1 {} tp2 {}",
        direction, entry_price, stop_loss, take_profit_1, take_profit_2
    );

    Some(OteZone {
        zone_start: fib_levels.get("0.618")?,
        zone_end: fib_levels.get("0.786")?,
        entry_price,
        stop_loss,
        take_profit_1,
        take_profit_2,
        fib_levels,
    })
}
