pub mod analysis;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod health;
pub mod llm;
pub mod middleware;
pub mod observability;
pub mod tasks;

use axum::{
    routing::{get, post},
    Router,
};
use market_data::{CandleFeed, Granularity, Instrument};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Settings;
pub use db::Db;
pub use error::ApiError;
pub use observability::MetricsCollector;

use analysis::AnalysisParams;
use llm::TextGenerator;
use middleware::RateLimiter;
use tasks::TaskStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub feed: Arc<CandleFeed>,
    pub llm: Arc<dyn TextGenerator>,
    pub tasks: TaskStore,
    pub metrics: MetricsCollector,
    pub rate_limiter: RateLimiter,
    pub allowed_instruments: Vec<Instrument>,
    pub default_granularity: Granularity,
    pub analysis_params: AnalysisParams,
    /// Present when the candle cache is backed by Postgres
    pub db: Option<Db>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        feed: Arc<CandleFeed>,
        llm: Arc<dyn TextGenerator>,
    ) -> anyhow::Result<Self> {
        let analysis_params = AnalysisParams {
            stop_offset: settings.stop_offset()?,
            ..AnalysisParams::default()
        };

        Ok(Self {
            allowed_instruments: settings.instruments()?,
            default_granularity: settings.granularity()?,
            rate_limiter: RateLimiter::per_minute(settings.rate_limit_per_minute),
            analysis_params,
            feed,
            llm,
            tasks: TaskStore::new(),
            metrics: MetricsCollector::new(),
            db: None,
            settings,
        })
    }

    pub fn with_db(mut self, db: Db) -> Self {
        self.db = Some(db);
        self
    }
}

/// Build the API router
pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // LLM calls are the expensive ones
    let llm_routes = Router::new()
        .route("/api/analyze", post(handlers::analyze::start_analysis))
        .route(
            "/api/analyze/{provider}",
            post(handlers::analyze::analyze_with_provider),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ));

    let api_routes = Router::new()
        .route("/api/market-data", get(handlers::market::get_market_data))
        .route("/api/price", get(handlers::market::get_price))
        .route("/api/analysis", post(handlers::market::analyze_candles))
        .route("/api/results/{task_id}", get(handlers::analyze::get_results));

    let monitoring_routes = Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/monitoring/status", get(health::monitoring_status))
        .route("/monitoring/metrics", get(health::monitoring_metrics));

    Router::new()
        .merge(llm_routes)
        .merge(api_routes)
        .merge(monitoring_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
