use crate::models::Project;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Side effects of a quit verdict (order cancellation, cooldown bookkeeping)
///
/// Called before the project's terminal state is persisted; an error keeps the
/// project active so the quit is retried next cycle.
#[async_trait]
pub trait ExitHandler: Send + Sync {
    async fn handle_quit(&self, project: &Project, blacklist: bool) -> Result<()>;
}

/// Symbols temporarily excluded from new project creation
///
/// Cloneable; all clones share the same cooldown table.
#[derive(Clone)]
pub struct Blacklist {
    cooldown: Duration,
    until: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
}

impl Default for Blacklist {
    fn default() -> Self {
        Self::new(Duration::hours(2))
    }
}

impl Blacklist {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            until: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Exclude `symbol` until `now + cooldown` (extends an active entry)
    pub fn add_at(&self, symbol: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let mut until = self.until.write().map_err(|e| Error::Store(e.to_string()))?;
        let expiry = now + self.cooldown;

        let entry = until.entry(symbol.to_string()).or_insert(expiry);
        if *entry < expiry {
            *entry = expiry;
        }

        Ok(*entry)
    }

    pub fn is_blacklisted(&self, symbol: &str) -> Result<bool> {
        self.is_blacklisted_at(symbol, Utc::now())
    }

    pub fn is_blacklisted_at(&self, symbol: &str, now: DateTime<Utc>) -> Result<bool> {
        let until = self.until.read().map_err(|e| Error::Store(e.to_string()))?;
        Ok(until.get(symbol).map(|expiry| now < *expiry).unwrap_or(false))
    }

    /// Drop expired entries; returns how many were removed
    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut until = self.until.write().map_err(|e| Error::Store(e.to_string()))?;
        let before = until.len();
        until.retain(|_, expiry| now < *expiry);
        Ok(before - until.len())
    }
}

#[async_trait]
impl ExitHandler for Blacklist {
    async fn handle_quit(&self, project: &Project, blacklist: bool) -> Result<()> {
        tracing::info!(
            project_id = project.id,
            symbol = %project.symbol,
            roi = project.roi,
            "Exit requested for project"
        );

        let now = Utc::now();
        let purged = self.purge_expired_at(now)?;
        if purged > 0 {
            tracing::debug!("Dropped {} expired blacklist entries", purged);
        }

        if blacklist {
            let expiry = self.add_at(&project.symbol, now)?;
            tracing::warn!(
                "⛔ {} blacklisted until {}",
                project.symbol,
                expiry.format("%H:%M:%S")
            );
        }

        Ok(())
    }
}
