//! Health and monitoring endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::observability::{metrics, MetricsSnapshot};
use crate::AppState;

/// Liveness, no external dependencies
pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Readiness. A failing candle source only degrades the status since the
/// cache can still serve; an unreachable database is fatal.
pub async fn readyz(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReadinessResponse>, StatusCode> {
    let mut checks = Vec::new();
    let mut degraded = false;

    let source = state.feed.health().await;
    if !source.is_healthy {
        degraded = true;
    }
    checks.push(HealthCheck {
        name: source.source.clone(),
        status: if source.is_healthy { "ok" } else { "degraded" }.to_string(),
    });

    if let Some(db) = &state.db {
        match sqlx::query("SELECT 1").fetch_one(db).await {
            Ok(_) => checks.push(HealthCheck {
                name: "database".to_string(),
                status: "ok".to_string(),
            }),
            Err(e) => {
                tracing::error!("Readiness check failed: {}", e);
                return Err(StatusCode::SERVICE_UNAVAILABLE);
            }
        }
    }

    Ok(Json(ReadinessResponse {
        status: if degraded { "degraded" } else { "ready" }.to_string(),
        checks,
    }))
}

/// GET /monitoring/status
pub async fn monitoring_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.settings.app_env.clone(),
    })
}

/// GET /monitoring/metrics
pub async fn monitoring_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    let pending = state.tasks.pending_count().await;
    state.metrics.gauge(metrics::TASKS_PENDING, pending as f64).await;
    Json(state.metrics.snapshot().await)
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub checks: Vec<HealthCheck>,
}

#[derive(Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: String,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
}
