use analyst_api::{db, llm::RouterClient, AppState, Settings};
use market_data::{CandleFeed, MemoryCandleCache, OandaClient, PgCandleCache};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;

    let level = Level::from_str(&settings.log_level).unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    info!(
        "Starting analyst API ({}, instruments: {})",
        settings.app_env, settings.allowed_instruments
    );

    let api_key = settings.oanda_api_key.clone().unwrap_or_default();
    let account_id = settings.oanda_account_id.clone().unwrap_or_default();
    let oanda = match &settings.oanda_base_url {
        Some(url) => OandaClient::with_base_url(api_key, account_id, url.as_str())?,
        None => OandaClient::new(api_key, account_id, settings.oanda_environment()?)?,
    };
    let feed = CandleFeed::new(Arc::new(oanda));

    let (feed, pool) = match &settings.database_url {
        Some(url) => {
            info!("Connecting to candle cache database...");
            let pool = db::init_db(url).await?;
            let cache = PgCandleCache::new(pool.clone());
            cache.migrate().await?;
            info!("Candle cache migrations applied");
            (feed.with_cache(Arc::new(cache)), Some(pool))
        }
        None => {
            warn!("DATABASE_URL not set, caching candles in memory");
            (feed.with_cache(Arc::new(MemoryCandleCache::new())), None)
        }
    };

    let router = RouterClient::new(
        settings.router_api_key.clone().unwrap_or_default(),
        settings.router_base_url.clone(),
        settings.max_retries,
        Duration::from_secs(settings.retry_delay_secs),
    )?;

    let port = settings.port;
    let mut state = AppState::new(settings, Arc::new(feed), Arc::new(router))?;
    if let Some(pool) = pool {
        state = state.with_db(pool);
    }

    let app = analyst_api::app(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Analyst API listening on port {}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
