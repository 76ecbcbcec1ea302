//! HTTP handlers

pub mod analyze;
pub mod market;

use crate::error::ApiError;
use crate::observability::metrics;
use crate::AppState;
use market_data::{CandleSeries, Granularity, Instrument, MAX_CANDLE_COUNT};
use std::str::FromStr;

/// Validated instrument, timeframe and candle count for one request
#[derive(Debug, Clone)]
pub struct MarketRequest {
    pub instrument: Instrument,
    pub granularity: Granularity,
    pub count: usize,
}

impl MarketRequest {
    /// Fill in defaults and check the request against the allow-list
    pub fn resolve(
        state: &AppState,
        instrument: Option<&str>,
        granularity: Option<&str>,
        count: Option<usize>,
        default_count: usize,
    ) -> Result<Self, ApiError> {
        let instrument = match instrument {
            Some(symbol) => Instrument::parse(symbol)?,
            None => state
                .allowed_instruments
                .first()
                .cloned()
                .ok_or_else(|| ApiError::Internal("no instruments configured".to_string()))?,
        };
        if !state.allowed_instruments.contains(&instrument) {
            return Err(ApiError::BadRequest(format!(
                "instrument {} is not supported, allowed: {}",
                instrument,
                state
                    .allowed_instruments
                    .iter()
                    .map(|i| i.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        let granularity = match granularity {
            Some(g) => Granularity::from_str(g)?,
            None => state.default_granularity,
        };

        let count = count.unwrap_or(default_count);
        if count == 0 || count > MAX_CANDLE_COUNT {
            return Err(ApiError::BadRequest(format!(
                "count must be between 1 and {}",
                MAX_CANDLE_COUNT
            )));
        }

        Ok(Self {
            instrument,
            granularity,
            count,
        })
    }
}

/// Fetch candles through the feed, treating an empty series as an upstream failure
pub(crate) async fn fetch_series(
    state: &AppState,
    request: &MarketRequest,
) -> Result<CandleSeries, ApiError> {
    state.metrics.increment(metrics::MARKET_DATA_REQUESTS, 1).await;

    let series = match state
        .feed
        .latest(&request.instrument, request.granularity, request.count)
        .await
    {
        Ok(series) => series,
        Err(e) => {
            state.metrics.increment(metrics::MARKET_DATA_ERRORS, 1).await;
            return Err(e.into());
        }
    };

    if series.candles.is_empty() {
        state.metrics.increment(metrics::MARKET_DATA_ERRORS, 1).await;
        return Err(ApiError::Upstream(format!(
            "no candles available for {} {}",
            request.instrument, request.granularity
        )));
    }

    state
        .metrics
        .increment(metrics::CANDLES_FETCHED, series.candles.len() as u64)
        .await;
    Ok(series)
}
