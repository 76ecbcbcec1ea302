//! Market Structure Analysis
//!
//! Pure functions over an ascending OHLC series:
//! - trend direction and strength from SMA(20)/SMA(50) and recent highs/lows
//! - swing highs/lows over a symmetric window
//! - Fibonacci retracement levels and the OTE (optimal trade entry) zone
//!
//! Nothing here performs I/O or holds state, so every function is safe to
//! call from any number of tasks at once.

use chrono::{DateTime, Utc};
use market_data::Candle;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

pub mod fibonacci;
pub mod structure;
pub mod trend;

pub use fibonacci::{
    calculate_fibonacci_levels, calculate_ote_zone, calculate_ote_zone_with_offset,
    default_stop_offset, FibonacciLevels, OteZone, FIB_LABELS,
};
pub use structure::{find_structure_points, StructurePoints, SwingPoint, DEFAULT_SWING_WINDOW};
pub use trend::{identify_trend, TrendDirection, TrendInfo, TrendStrength};

/// Errors for structurally invalid input. Short series are never an error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalysisError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Tunables for a full analysis run
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnalysisParams {
    /// Candles on each side of a swing point
    pub swing_window: usize,
    /// Absolute distance of the stop beyond the swing extreme
    pub stop_offset: Decimal,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            swing_window: DEFAULT_SWING_WINDOW,
            stop_offset: default_stop_offset(),
        }
    }
}

/// Combined payload handed to prompt builders and API responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketAnalysis {
    pub trend: TrendInfo,
    pub structure: StructurePoints,
    pub ote: Option<OteZone>,
}

/// Trend, then swing structure, then the OTE zone derived from both
pub fn analyze(candles: &[Candle], params: &AnalysisParams) -> Result<MarketAnalysis> {
    let trend = identify_trend(candles)?;
    let structure = find_structure_points(candles, params.swing_window)?;
    let ote = calculate_ote_zone_with_offset(trend.direction, &structure, params.stop_offset);

    info!(
        "Analysis over {} candles: {:?}/{:?}, {} highs, {} lows, ote={}",
        candles.len(),
        trend.direction,
        trend.strength,
        structure.swing_highs.len(),
        structure.swing_lows.len(),
        ote.is_some()
    );

    Ok(MarketAnalysis {
        trend,
        structure,
        ote,
    })
}

/// Reject series the analysis cannot reason about
pub(crate) fn validate_series(candles: &[Candle]) -> Result<()> {
    if candles.is_empty() {
        return Err(AnalysisError::InvalidInput("candle series is empty".to_string()));
    }

    let mut previous: Option<DateTime<Utc>> = None;
    for (i, c) in candles.iter().enumerate() {
        if !c.is_well_formed() {
            return Err(AnalysisError::InvalidInput(format!(
                "candle {} is malformed: prices must be positive with open/close inside high/low",
                i
            )));
        }

        if let Some(prev) = previous {
            if c.time <= prev {
                return Err(AnalysisError::InvalidInput(format!(
                    "candle {} time {} is not after {}",
                    i, c.time, prev
                )));
            }
        }
        previous = Some(c.time);
    }

    Ok(())
}

/// Mean of a non-empty slice of prices
pub(crate) fn mean(values: impl ExactSizeIterator<Item = Decimal>) -> Option<Decimal> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    let sum: Decimal = values.sum();
    Some(sum / Decimal::from(n as u64))
}
