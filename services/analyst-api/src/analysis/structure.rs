//! Swing point detection
//!
//! A candle is a swing high when its high equals the highest high within
//! `window` candles on each side (swing lows mirror this with lows). Flat tops
//! and bottoms produce several adjacent swing points; they are kept as-is.

use super::{validate_series, Result};
use chrono::{DateTime, Utc};
use market_data::Candle;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const DEFAULT_SWING_WINDOW: usize = 5;
/// Most recent swing points kept per side
const MAX_POINTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    /// Position in the analysed series
    pub index: usize,
    pub price: Decimal,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructurePoints {
    /// Oldest first, at most 3
    pub swing_highs: Vec<SwingPoint>,
    /// Oldest first, at most 3
    pub swing_lows: Vec<SwingPoint>,
}

impl StructurePoints {
    pub fn is_empty(&self) -> bool {
        self.swing_highs.is_empty() && self.swing_lows.is_empty()
    }
}

fn keep_most_recent(mut points: Vec<SwingPoint>) -> Vec<SwingPoint> {
    if points.len() > MAX_POINTS {
        points.drain(..points.len() - MAX_POINTS);
    }
    points
}

/// Find the three most recent swing highs and lows.
///
/// Series shorter than `2 * window + 1` (or a zero window) yield no points.
pub fn find_structure_points(candles: &[Candle], window: usize) -> Result<StructurePoints> {
    validate_series(candles)?;

    let n = candles.len();
    if window == 0 || n < 2 * window + 1 {
        warn!(
            "Not enough candles for swing detection: have {}, need {}",
            n,
            2 * window + 1
        );
        return Ok(StructurePoints::default());
    }

    let mut swing_highs = Vec::new();
    let mut swing_lows = Vec::new();

    for i in window..n - window {
        let neighbourhood = &candles[i - window..=i + window];
        let candle = &candles[i];

        let is_high = neighbourhood.iter().all(|c| c.high <= candle.high);
        if is_high {
            swing_highs.push(SwingPoint {
                index: i,
                price: candle.high,
                time: candle.time,
            });
        }

        let is_low = neighbourhood.iter().all(|c| c.low >= candle.low);
        if is_low {
            swing_lows.push(SwingPoint {
                index: i,
                price: candle.low,
                time: candle.time,
            });
        }
    }

    let structure = StructurePoints {
        swing_highs: keep_most_recent(swing_highs),
        swing_lows: keep_most_recent(swing_lows),
    };

    info!(
        "Found {} swing highs and {} swing lows in {} candles",
        structure.swing_highs.len(),
        structure.swing_lows.len(),
        n
    );

    Ok(structure)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn test_short_series_has_no_points() {
        let candles = series(&[100, 105, 110, 105, 100, 95, 100, 105, 110, 105]);
        let points = find_structure_points(&candles, 5).unwrap();
        assert!(points.is_empty());

        // Zero window never matches anything
        assert!(find_structure_points(&candles, 0).unwrap().is_empty());
    }

    #[test]
    fn test_single_peak_and_trough() {
        let closes = [100, 102, 104, 106, 108, 110, 108, 106, 104, 102, 100, 98, 96, 94, 96, 98, 100, 102, 104];
        let candles = series(&closes);
        let points = find_structure_points(&candles, 3).unwrap();

        // Peak: candle 5 closes at 110, candle 6 opens at 110: both have high 111
        let high_indices: Vec<usize> = points.swing_highs.iter().map(|p| p.index).collect();
        assert_eq!(high_indices, vec![5, 6]);
        assert_eq!(points.swing_highs[0].price, Decimal::from(111));

        let low_indices: Vec<usize> = points.swing_lows.iter().map(|p| p.index).collect();
        assert_eq!(low_indices, vec![13, 14]);
        assert_eq!(points.swing_lows[0].price, Decimal::from(93));
        assert_eq!(points.swing_lows[0].time, candles[13].time);
    }

    #[test]
    fn test_never_more_than_three_per_side() {
        // Zigzag with a peak every 6 candles
        let closes: Vec<i64> = (0..200)
            .map(|i| {
                let phase = i % 6;
                1000 + if phase <= 3 { phase * 10 } else { (6 - phase) * 10 }
            })
            .collect();
        let candles = series(&closes);
        let points = find_structure_points(&candles, 2).unwrap();

        assert!(points.swing_highs.len() <= 3);
        assert!(points.swing_lows.len() <= 3);
        assert!(!points.swing_highs.is_empty());
        assert!(points.swing_highs.windows(2).all(|w| w[0].index < w[1].index));
        // Most recent ones are kept
        assert!(points.swing_highs.last().unwrap().index > 180);
    }

    #[test]
    fn test_flat_series_marks_every_candidate() {
        let candles = series(&[100; 15]);
        let points = find_structure_points(&candles, 2).unwrap();

        let high_indices: Vec<usize> = points.swing_highs.iter().map(|p| p.index).collect();
        assert_eq!(high_indices, vec![10, 11, 12]);
        assert_eq!(points.swing_lows.len(), 3);
    }
}
