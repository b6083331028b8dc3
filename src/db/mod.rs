// Persistence for order-book history, candles, projects and the order ledger
pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::models::{Candle, FilledTotals, OrderBookSample, OrderSide, Project};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Outcome of a snapshot batch write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotWrite {
    /// All rows written in one batch
    Inserted(usize),
    /// (symbol, sequence_id) was already stored; nothing written
    Duplicate,
}

/// Order-book history, kline series and project rows
///
/// Snapshot writes are all-or-nothing and idempotent per (symbol, sequence_id).
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Whether any row exists for this snapshot
    async fn has_snapshot(&self, symbol: &str, sequence_id: i64) -> Result<bool>;

    /// Write one full snapshot atomically
    ///
    /// All samples must share the same symbol and sequence id. The dedup check is
    /// repeated under the store's own per-symbol exclusion, so concurrent writers of
    /// the same snapshot produce exactly one set of rows.
    async fn insert_snapshot(&self, samples: &[OrderBookSample]) -> Result<SnapshotWrite>;

    /// Most recently written bid row for the symbol (highest bid of the latest snapshot)
    async fn latest_bid(&self, symbol: &str) -> Result<Option<OrderBookSample>>;

    /// Upsert candles keyed by (symbol, open_time); returns rows written
    async fn save_candles(&self, candles: &[Candle]) -> Result<usize>;

    /// The latest `limit` candles by open time, returned oldest first
    async fn recent_candles(&self, symbol: &str, limit: usize) -> Result<Vec<Candle>>;

    async fn load_active_projects(&self) -> Result<Vec<Project>>;

    /// Write back derived fields (roi, balance_base, balance_quote)
    async fn update_project_roi(&self, project: &Project) -> Result<()>;

    /// Persist the terminal state of a quit project
    async fn close_project(&self, project_id: i64, closed_at: DateTime<Utc>) -> Result<()>;
}

/// Filled-order totals keyed by project
#[async_trait]
pub trait OrderLedger: Send + Sync {
    /// Sum of filled quantity and quote amount for one side; zero totals when no rows match
    async fn sum_filled_orders(&self, project_id: i64, side: OrderSide) -> Result<FilledTotals>;
}

/// Reject batches that mix snapshots or are empty
pub(crate) fn snapshot_key(samples: &[OrderBookSample]) -> Result<(&str, i64)> {
    let first = samples
        .first()
        .ok_or_else(|| crate::Error::InvalidData("Empty snapshot".to_string()))?;

    if samples
        .iter()
        .any(|s| s.symbol != first.symbol || s.sequence_id != first.sequence_id)
    {
        return Err(crate::Error::InvalidData(format!(
            "Snapshot batch for {} #{} mixes rows from other snapshots",
            first.symbol, first.sequence_id
        )));
    }

    Ok((first.symbol.as_str(), first.sequence_id))
}
