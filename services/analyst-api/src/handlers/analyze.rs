//! LLM commentary endpoints
//!
//! `POST /api/analyze/{provider}` answers synchronously with one model;
//! `POST /api/analyze` fans out to every provider in a background task.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::market::record_analysis;
use super::{fetch_series, MarketRequest};
use crate::analysis::{self, MarketAnalysis};
use crate::error::ApiError;
use crate::llm::{build_strategy_prompt, LlmError, LlmProvider, LlmRequest, LlmResponse, SYSTEM_PROMPT};
use crate::observability::metrics;
use crate::tasks::TaskState;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AnalyzeRequest {
    pub instrument: Option<String>,
    pub granularity: Option<String>,
    pub count: Option<usize>,
    /// Chart screenshot, plain base64 or a `data:` URL
    pub image_base64: Option<String>,
}

/// Everything needed to ask a model about one market
#[derive(Debug, Clone)]
struct PreparedPrompt {
    market: MarketRequest,
    analysis: MarketAnalysis,
    prompt: String,
    image_base64: Option<String>,
}

/// An empty body means all defaults
fn parse_body(body: &Bytes) -> Result<AnalyzeRequest, ApiError> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(AnalyzeRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid request body: {}", e)))
}

/// Strip any `data:` prefix and check the payload decodes
fn normalize_image(image: Option<String>) -> Result<Option<String>, ApiError> {
    let Some(image) = image else {
        return Ok(None);
    };

    let payload = match image.split_once(',') {
        Some((prefix, data)) if prefix.starts_with("data:") => data.to_string(),
        _ => image,
    };
    let payload = payload.trim().to_string();
    if payload.is_empty() {
        return Ok(None);
    }

    base64::engine::general_purpose::STANDARD
        .decode(&payload)
        .map_err(|e| ApiError::BadRequest(format!("image_base64 is not valid base64: {}", e)))?;
    Ok(Some(payload))
}

fn resolve(state: &AppState, body: AnalyzeRequest) -> Result<(MarketRequest, Option<String>), ApiError> {
    let market = MarketRequest::resolve(
        state,
        body.instrument.as_deref(),
        body.granularity.as_deref(),
        body.count,
        state.settings.default_candle_count,
    )?;
    let image = normalize_image(body.image_base64)?;
    Ok((market, image))
}

async fn prepare(
    state: &AppState,
    market: MarketRequest,
    image_base64: Option<String>,
) -> Result<PreparedPrompt, ApiError> {
    let series = fetch_series(state, &market).await?;
    let analysis = analysis::analyze(&series.candles, &state.analysis_params)?;
    record_analysis(state, &analysis).await;

    let prompt = build_strategy_prompt(&market.instrument, market.granularity, &analysis);
    Ok(PreparedPrompt {
        market,
        analysis,
        prompt,
        image_base64,
    })
}

async fn generate(
    state: &AppState,
    provider: LlmProvider,
    prepared: &PreparedPrompt,
) -> Result<LlmResponse, LlmError> {
    let request = LlmRequest {
        provider,
        system_prompt: SYSTEM_PROMPT.to_string(),
        prompt: prepared.prompt.clone(),
        image_base64: prepared.image_base64.clone(),
    };

    state.metrics.increment(metrics::LLM_REQUESTS, 1).await;
    match state.llm.generate(&request).await {
        Ok(response) => {
            state
                .metrics
                .histogram(metrics::LLM_LATENCY_MS, response.elapsed_ms as f64)
                .await;
            info!(
                "{} analysis for {} ready in {}ms",
                provider, prepared.market.instrument, response.elapsed_ms
            );
            Ok(response)
        }
        Err(e) => {
            state.metrics.increment(metrics::LLM_ERRORS, 1).await;
            warn!("{} analysis for {} failed: {}", provider, prepared.market.instrument, e);
            Err(e)
        }
    }
}

/// POST /api/analyze/{provider}
pub async fn analyze_with_provider(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let provider = LlmProvider::from_str(&provider)?;
    let (market, image) = resolve(&state, parse_body(&body)?)?;

    let prepared = prepare(&state, market, image).await?;
    let response = generate(&state, provider, &prepared).await?;

    Ok(Json(json!({
        "status": "ok",
        "provider": response.provider,
        "model": response.model,
        "analysis": response.analysis,
        "elapsed_ms": response.elapsed_ms,
        "instrument": prepared.market.instrument,
        "granularity": prepared.market.granularity,
    })))
}

/// POST /api/analyze
///
/// Validation happens before the task is created; market data and model
/// failures end up in the task result.
pub async fn start_analysis(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let (market, image) = resolve(&state, parse_body(&body)?)?;

    let task_id = state.tasks.create().await;
    state.metrics.increment(metrics::TASKS_STARTED, 1).await;
    info!("Started analysis task {} for {}", task_id, market.instrument);

    let worker = state.clone();
    tokio::spawn(async move {
        match run_all_providers(&worker, market, image).await {
            Ok(data) => worker.tasks.complete(task_id, data).await,
            Err(e) => {
                error!("Analysis task {} failed: {}", task_id, e);
                worker.metrics.increment(metrics::TASKS_FAILED, 1).await;
                worker.tasks.fail(task_id, e.to_string()).await;
            }
        }
        let pending = worker.tasks.pending_count().await;
        worker.metrics.gauge(metrics::TASKS_PENDING, pending as f64).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "task_id": task_id, "status": "started" })),
    ))
}

/// One market snapshot, then every provider concurrently
async fn run_all_providers(
    state: &AppState,
    market: MarketRequest,
    image: Option<String>,
) -> Result<Value, ApiError> {
    let prepared = prepare(state, market, image).await?;

    let results = futures::future::join_all(
        LlmProvider::ALL
            .iter()
            .map(|provider| generate(state, *provider, &prepared)),
    )
    .await;

    let mut models = Map::new();
    for (provider, result) in LlmProvider::ALL.iter().zip(results) {
        let entry = match result {
            Ok(response) => json!({
                "status": "ok",
                "model": response.model,
                "analysis": response.analysis,
                "elapsed_ms": response.elapsed_ms,
            }),
            Err(e) => json!({ "status": "error", "error": e.to_string() }),
        };
        models.insert(provider.as_str().to_string(), entry);
    }

    Ok(json!({
        "instrument": prepared.market.instrument,
        "granularity": prepared.market.granularity,
        "market_analysis": prepared.analysis,
        "models": models,
    }))
}

/// GET /api/results/{task_id}
pub async fn get_results(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let not_found = || ApiError::NotFound(format!("task {} not found", task_id));
    let id = Uuid::parse_str(&task_id).map_err(|_| not_found())?;

    match state.tasks.get(&id).await {
        Some(TaskState::Pending) => Ok(Json(json!({ "status": "pending" }))),
        Some(TaskState::Completed(data)) => Ok(Json(json!({ "status": "completed", "data": data }))),
        Some(TaskState::Failed(e)) => Err(ApiError::Internal(e)),
        None => Err(not_found()),
    }
}
