//! Properties the analysis core guarantees for any caller

use analyst_api::analysis::{
    calculate_fibonacci_levels, calculate_ote_zone, find_structure_points, identify_trend,
    StructurePoints, SwingPoint, TrendDirection, TrendStrength,
};
use chrono::{Duration, TimeZone, Utc};
use market_data::Candle;
use rust_decimal::Decimal;

fn candles_from_closes(closes: &[i64]) -> Vec<Candle> {
    let start = Utc.with_ymd_and_hms(2024, 5, 6, 0, 0, 0).unwrap();
    let mut open = closes.first().copied().unwrap_or(1);
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let candle = Candle {
                time: start + Duration::minutes(5 * i as i64),
                open: Decimal::from(open),
                high: Decimal::from(open.max(close) + 2),
                low: Decimal::from(open.min(close) - 2),
                close: Decimal::from(close),
                volume: None,
            };
            open = close;
            candle
        })
        .collect()
}

/// Deterministic zig-zag so swing detection has plenty to find
fn zigzag(len: usize) -> Vec<i64> {
    (0..len as i64)
        .map(|i| 1000 + (i * 37 % 23) * 3 - (i * 11 % 7) * 5)
        .collect()
}

fn point(price: i64) -> SwingPoint {
    SwingPoint {
        index: 0,
        price: Decimal::from(price),
        time: Utc.with_ymd_and_hms(2024, 5, 6, 0, 0, 0).unwrap(),
    }
}

#[test]
fn short_series_are_neutral_and_weak() {
    for len in 1..5 {
        let closes: Vec<i64> = (0..len).map(|i| 500 - i * 40).collect();
        let trend = identify_trend(&candles_from_closes(&closes)).unwrap();
        assert_eq!(trend.direction, TrendDirection::Neutral);
        assert_eq!(trend.strength, TrendStrength::Weak);
    }
}

#[test]
fn monotonic_series_follow_their_direction() {
    for len in [50usize, 51, 80, 200] {
        let rising: Vec<i64> = (0..len as i64).map(|i| 1000 + i * 3).collect();
        let falling: Vec<i64> = rising.iter().rev().copied().collect();

        assert_eq!(
            identify_trend(&candles_from_closes(&rising)).unwrap().direction,
            TrendDirection::Bullish,
            "rising series of {}",
            len
        );
        assert_eq!(
            identify_trend(&candles_from_closes(&falling)).unwrap().direction,
            TrendDirection::Bearish,
            "falling series of {}",
            len
        );
    }
}

#[test]
fn structure_needs_a_full_window() {
    for window in 1..=6usize {
        let candles = candles_from_closes(&zigzag(2 * window));
        let structure = find_structure_points(&candles, window).unwrap();
        assert!(structure.swing_highs.is_empty());
        assert!(structure.swing_lows.is_empty());
    }
}

#[test]
fn structure_keeps_at_most_three_points() {
    for len in [11usize, 40, 120, 500] {
        let candles = candles_from_closes(&zigzag(len));
        for window in [1usize, 2, 5] {
            let structure = find_structure_points(&candles, window).unwrap();
            assert!(structure.swing_highs.len() <= 3);
            assert!(structure.swing_lows.len() <= 3);
        }
    }
}

#[test]
fn fibonacci_levels_span_start_to_end() {
    let up = calculate_fibonacci_levels(Decimal::from(100), Decimal::from(200));
    assert_eq!(up.get("0.0"), Some(Decimal::from(100)));
    assert_eq!(up.get("1.0"), Some(Decimal::from(200)));
    assert_eq!(up.get("0.705"), Some(Decimal::new(1705, 1)));

    let down = calculate_fibonacci_levels(Decimal::from(200), Decimal::from(100));
    assert_eq!(down.get("0.0"), Some(Decimal::from(200)));
    assert_eq!(down.get("1.0"), Some(Decimal::from(100)));
}

#[test]
fn bullish_ote_zone_from_single_swing_pair() {
    let structure = StructurePoints {
        swing_highs: vec![point(110)],
        swing_lows: vec![point(100)],
    };
    let ote = calculate_ote_zone(TrendDirection::Bullish, &structure).unwrap();

    assert_eq!(ote.entry_price, Decimal::new(10705, 2));
    assert_eq!(ote.stop_loss, Decimal::from(100) - Decimal::new(3, 4));
    assert_eq!(ote.take_profit_2, Decimal::from(110));
}

#[test]
fn ote_zone_absent_without_direction_or_swings() {
    let structure = StructurePoints {
        swing_highs: vec![point(110), point(120)],
        swing_lows: vec![point(100)],
    };
    assert!(calculate_ote_zone(TrendDirection::Neutral, &structure).is_none());

    let empty = StructurePoints::default();
    for direction in [
        TrendDirection::Bullish,
        TrendDirection::Bearish,
        TrendDirection::Neutral,
    ] {
        assert!(calculate_ote_zone(direction, &empty).is_none());
    }
}

#[test]
fn analysis_is_idempotent() {
    let candles = candles_from_closes(&zigzag(90));

    assert_eq!(identify_trend(&candles).unwrap(), identify_trend(&candles).unwrap());
    assert_eq!(
        find_structure_points(&candles, 5).unwrap(),
        find_structure_points(&candles, 5).unwrap()
    );
    assert_eq!(
        calculate_fibonacci_levels(Decimal::from(7), Decimal::from(3)),
        calculate_fibonacci_levels(Decimal::from(7), Decimal::from(3))
    );

    let structure = find_structure_points(&candles, 5).unwrap();
    assert_eq!(
        calculate_ote_zone(TrendDirection::Bearish, &structure),
        calculate_ote_zone(TrendDirection::Bearish, &structure)
    );
}
