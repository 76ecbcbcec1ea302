//! Market data and analysis endpoints

use axum::{
    extract::{Query, State},
    Json,
};
use market_data::Candle;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{fetch_series, MarketRequest};
use crate::analysis::{self, AnalysisParams, MarketAnalysis};
use crate::error::ApiError;
use crate::observability::metrics;
use crate::AppState;

/// Candles requested by `GET /api/market-data` when no count is given
pub const MARKET_DATA_DEFAULT_COUNT: usize = 50;

/// Candles echoed back alongside the analysis
const RECENT_CANDLES: usize = 10;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MarketQuery {
    pub instrument: Option<String>,
    pub granularity: Option<String>,
    /// Kept as text so a bad value gets the JSON error body
    pub count: Option<String>,
}

impl MarketQuery {
    fn count(&self) -> Result<Option<usize>, ApiError> {
        self.count
            .as_deref()
            .map(|c| {
                c.trim()
                    .parse::<usize>()
                    .map_err(|_| ApiError::BadRequest(format!("invalid count '{}'", c)))
            })
            .transpose()
    }
}

/// GET /api/market-data
pub async fn get_market_data(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MarketQuery>,
) -> Result<Json<Value>, ApiError> {
    let request = MarketRequest::resolve(
        &state,
        query.instrument.as_deref(),
        query.granularity.as_deref(),
        query.count()?,
        MARKET_DATA_DEFAULT_COUNT,
    )?;

    let series = fetch_series(&state, &request).await?;
    let result = analysis::analyze(&series.candles, &state.analysis_params)?;
    record_analysis(&state, &result).await;

    let recent = &series.candles[series.candles.len().saturating_sub(RECENT_CANDLES)..];

    Ok(Json(json!({
        "status": "ok",
        "instrument": series.instrument,
        "granularity": series.granularity,
        "source": series.source,
        "candles": recent,
        "trend_info": result.trend,
        "structure_points": result.structure,
        "ote_zone": result.ote,
    })))
}

/// GET /api/price
pub async fn get_price(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MarketQuery>,
) -> Result<Json<Value>, ApiError> {
    let request = MarketRequest::resolve(&state, query.instrument.as_deref(), None, None, 1)?;
    let quote = state.feed.current_price(&request.instrument).await?;

    Ok(Json(json!({
        "status": "ok",
        "instrument": quote.instrument,
        "price": quote.ask,
        "bid": quote.bid,
        "source": quote.source,
        "timestamp": quote.timestamp,
    })))
}

#[derive(Debug, Deserialize)]
pub struct AnalysisRequest {
    pub candles: Vec<Candle>,
    #[serde(default)]
    pub swing_window: Option<usize>,
}

/// POST /api/analysis
///
/// Runs the analysis over caller-supplied candles without touching the feed.
pub async fn analyze_candles(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AnalysisRequest>,
) -> Result<Json<MarketAnalysis>, ApiError> {
    let params = AnalysisParams {
        swing_window: body.swing_window.unwrap_or(state.analysis_params.swing_window),
        ..state.analysis_params
    };

    let result = analysis::analyze(&body.candles, &params)?;
    record_analysis(&state, &result).await;
    Ok(Json(result))
}

pub(crate) async fn record_analysis(state: &AppState, result: &MarketAnalysis) {
    state.metrics.increment(metrics::ANALYSIS_RUNS, 1).await;
    if result.ote.is_some() {
        state.metrics.increment(metrics::OTE_ZONES_FOUND, 1).await;
    }
}
