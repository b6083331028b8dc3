use crate::{Error, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Runtime settings
///
/// Layered as defaults, then an optional TOML file, then `ROIBOT_*` environment
/// variables. `DATABASE_URL` is used when no database url is configured.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    pub database_url: String,
    pub exchange_base_url: String,
    pub symbols: Vec<String>,
    pub depth: u16,
    pub ingest_interval_secs: u64,
    pub manage_interval_secs: u64,
    pub kline_interval_secs: u64,
    pub kline_limit: u16,
    pub max_price_age_secs: i64,
    pub blacklist_cooldown_hours: i64,
    pub max_connections: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/roibot".to_string(),
            exchange_base_url: "https://api.binance.com".to_string(),
            symbols: Vec::new(),
            depth: 10,
            ingest_interval_secs: 3,
            manage_interval_secs: 60,
            kline_interval_secs: 60,
            kline_limit: 1000,
            max_price_age_secs: 60,
            blacklist_cooldown_hours: 2,
            max_connections: 5,
        }
    }
}

impl Settings {
    /// Load and validate settings; `path` overrides the default `roibot.toml` lookup
    pub fn load(path: Option<&str>) -> Result<Self> {
        let settings = Self::build(path)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Merge all sources without validating
    pub fn build(path: Option<&str>) -> Result<Self> {
        let defaults = Settings::default();

        let mut builder = Config::builder()
            .set_default("database_url", defaults.database_url)?
            .set_default("exchange_base_url", defaults.exchange_base_url)?
            .set_default("symbols", Vec::<String>::new())?
            .set_default("depth", defaults.depth as i64)?
            .set_default("ingest_interval_secs", defaults.ingest_interval_secs as i64)?
            .set_default("manage_interval_secs", defaults.manage_interval_secs as i64)?
            .set_default("kline_interval_secs", defaults.kline_interval_secs as i64)?
            .set_default("kline_limit", defaults.kline_limit as i64)?
            .set_default("max_price_age_secs", defaults.max_price_age_secs)?
            .set_default("blacklist_cooldown_hours", defaults.blacklist_cooldown_hours)?
            .set_default("max_connections", defaults.max_connections as i64)?;

        if let Ok(database_url) = std::env::var("DATABASE_URL") {
            builder = builder.set_default("database_url", database_url)?;
        }

        builder = match path {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None => builder.add_source(File::with_name("roibot").required(false)),
        };

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("ROIBOT")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("symbols"),
            )
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }

    /// Replace the configured symbols (CLI override)
    pub fn with_symbols(mut self, symbols: Vec<String>) -> Result<Self> {
        self.symbols = symbols;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            return Err(Error::InvalidData("No symbols configured".to_string()));
        }
        if self.symbols.iter().any(|s| s.trim().is_empty()) {
            return Err(Error::InvalidData("Empty symbol in list".to_string()));
        }
        if self.depth == 0 {
            return Err(Error::InvalidData("Order book depth must be positive".to_string()));
        }
        if self.ingest_interval_secs == 0 || self.manage_interval_secs == 0 || self.kline_interval_secs == 0 {
            return Err(Error::InvalidData("Loop intervals must be positive".to_string()));
        }
        if self.kline_limit == 0 {
            return Err(Error::InvalidData("Kline limit must be positive".to_string()));
        }
        if self.max_price_age_secs <= 0 || self.blacklist_cooldown_hours < 0 {
            return Err(Error::InvalidData(format!(
                "Invalid price age {}s or cooldown {}h",
                self.max_price_age_secs, self.blacklist_cooldown_hours
            )));
        }
        Ok(())
    }

    pub fn ingest_interval(&self) -> Duration {
        Duration::from_secs(self.ingest_interval_secs)
    }

    pub fn manage_interval(&self) -> Duration {
        Duration::from_secs(self.manage_interval_secs)
    }

    pub fn kline_interval(&self) -> Duration {
        Duration::from_secs(self.kline_interval_secs)
    }

    pub fn max_price_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_price_age_secs)
    }

    pub fn blacklist_cooldown(&self) -> chrono::Duration {
        chrono::Duration::hours(self.blacklist_cooldown_hours)
    }
}
