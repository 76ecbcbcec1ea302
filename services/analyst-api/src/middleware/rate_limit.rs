//! Per-client rate limiting for the LLM endpoints
//!
//! Fixed window counters keyed by client address. State is per process.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::{error::ApiError, observability::metrics, AppState};

/// Requests seen from one client in the current window
#[derive(Debug, Clone, Copy)]
struct Window {
    opened: Instant,
    used: u32,
}

#[derive(Debug)]
struct Windows {
    by_client: HashMap<String, Window>,
    swept: Instant,
}

/// Expired windows are dropped at most once per sweep interval
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Fixed window limiter, `quota` requests per client per `window`
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<Mutex<Windows>>,
    window: Duration,
    quota: u32,
}

impl RateLimiter {
    pub fn new(window: Duration, quota: u32) -> Self {
        Self {
            windows: Arc::new(Mutex::new(Windows {
                by_client: HashMap::new(),
                swept: Instant::now(),
            })),
            window,
            quota,
        }
    }

    pub fn per_minute(quota: u32) -> Self {
        Self::new(Duration::from_secs(60), quota)
    }

    /// Spend one request of `client`'s quota; false when none is left
    pub async fn check(&self, client: &str) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;

        if now.duration_since(windows.swept) >= SWEEP_INTERVAL {
            let window = self.window;
            let before = windows.by_client.len();
            windows
                .by_client
                .retain(|_, w| now.duration_since(w.opened) < window);
            let dropped = before - windows.by_client.len();
            if dropped > 0 {
                tracing::debug!("Rate limiter dropped {} idle clients", dropped);
            }
            windows.swept = now;
        }

        let entry = windows
            .by_client
            .entry(client.to_string())
            .or_insert(Window { opened: now, used: 0 });

        if now.duration_since(entry.opened) >= self.window {
            *entry = Window { opened: now, used: 0 };
        }
        if entry.used >= self.quota {
            return false;
        }
        entry.used += 1;
        true
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::per_minute(10)
    }
}

/// Client key: socket peer address, then the first `X-Forwarded-For` hop
fn client_key(request: &Request<Body>) -> String {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let key = client_key(&request);

    if !state.rate_limiter.check(&key).await {
        tracing::warn!("Rate limit exceeded for {}", key);
        state.metrics.increment(metrics::RATE_LIMITED, 1).await;
        return Err(ApiError::RateLimited);
    }

    Ok(next.run(request).await)
}
