//! Service settings
//!
//! Loaded from the process environment (after `.env`, if present) through the
//! `config` crate. Variable names are the upper-cased field names, e.g.
//! `OANDA_API_KEY`, `RATE_LIMIT_PER_MINUTE`.

use crate::llm::router::DEFAULT_ROUTER_URL;
use anyhow::{bail, Context};
use market_data::{Granularity, Instrument, OandaEnvironment};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub port: u16,
    pub log_level: String,
    pub app_env: String,

    pub oanda_api_key: Option<String>,
    pub oanda_account_id: Option<String>,
    pub oanda_environment: String,
    /// Overrides the environment's REST host
    pub oanda_base_url: Option<String>,

    pub router_api_key: Option<String>,
    pub router_base_url: String,
    pub max_retries: u32,
    pub retry_delay_secs: u64,

    pub database_url: Option<String>,

    pub rate_limit_per_minute: u32,
    /// Decimal string, absolute price distance
    pub ote_stop_offset: String,
    /// Comma separated instrument symbols
    pub allowed_instruments: String,
    pub default_granularity: String,
    pub default_candle_count: usize,

    /// Skip the credential check
    pub testing: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 5000,
            log_level: "info".to_string(),
            app_env: "development".to_string(),
            oanda_api_key: None,
            oanda_account_id: None,
            oanda_environment: "practice".to_string(),
            oanda_base_url: None,
            router_api_key: None,
            router_base_url: DEFAULT_ROUTER_URL.to_string(),
            max_retries: 3,
            retry_delay_secs: 2,
            database_url: None,
            rate_limit_per_minute: 10,
            ote_stop_offset: "0.0003".to_string(),
            allowed_instruments: "XAU_USD".to_string(),
            default_granularity: "M5".to_string(),
            default_candle_count: 100,
            testing: false,
        }
    }
}

impl Settings {
    /// Load `.env` and the process environment
    pub fn load() -> anyhow::Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(e).context("failed to read .env");
            }
        }
        Self::from_environment(config::Environment::default())
    }

    /// Load from an explicit variable map instead of the process environment
    pub fn from_map(vars: HashMap<String, String>) -> anyhow::Result<Self> {
        Self::from_environment(config::Environment::default().source(Some(vars)))
    }

    fn from_environment(env: config::Environment) -> anyhow::Result<Self> {
        let settings: Settings = config::Config::builder()
            .add_source(env)
            .build()
            .context("failed to build settings")?
            .try_deserialize()
            .context("failed to parse settings")?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.stop_offset()?;
        self.instruments()?;
        self.granularity()?;
        OandaEnvironment::from_str(&self.oanda_environment)?;

        if self.default_candle_count == 0 || self.default_candle_count > 5000 {
            bail!("DEFAULT_CANDLE_COUNT must be between 1 and 5000");
        }

        if !self.testing {
            let mut missing = Vec::new();
            if self.oanda_api_key.is_none() {
                missing.push("OANDA_API_KEY");
            }
            if self.oanda_account_id.is_none() {
                missing.push("OANDA_ACCOUNT_ID");
            }
            if self.router_api_key.is_none() {
                missing.push("ROUTER_API_KEY");
            }
            if !missing.is_empty() {
                bail!("missing required settings: {}", missing.join(", "));
            }
        }

        Ok(())
    }

    pub fn stop_offset(&self) -> anyhow::Result<Decimal> {
        let offset = Decimal::from_str(self.ote_stop_offset.trim())
            .with_context(|| format!("invalid OTE_STOP_OFFSET '{}'", self.ote_stop_offset))?;
        if offset < Decimal::ZERO {
            bail!("OTE_STOP_OFFSET must not be negative");
        }
        Ok(offset)
    }

    pub fn instruments(&self) -> anyhow::Result<Vec<Instrument>> {
        let instruments = self
            .allowed_instruments
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Instrument::parse)
            .collect::<Result<Vec<_>, _>>()?;

        if instruments.is_empty() {
            bail!("ALLOWED_INSTRUMENTS must name at least one instrument");
        }
        Ok(instruments)
    }

    pub fn granularity(&self) -> anyhow::Result<Granularity> {
        Ok(Granularity::from_str(&self.default_granularity)?)
    }

    pub fn oanda_environment(&self) -> anyhow::Result<OandaEnvironment> {
        Ok(OandaEnvironment::from_str(&self.oanda_environment)?)
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }
}
