use crate::api::{ExchangeFeed, RetryPolicy};
use crate::db::{HistoryStore, SnapshotWrite};
use crate::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// What happened to one symbol during a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New snapshot written (row count)
    Written(usize),
    /// Sequence id already stored; fetch discarded
    Duplicate,
    /// Empty or malformed snapshot; nothing written
    Rejected,
    /// Fetch retries exhausted or the write failed
    Failed,
}

/// Per-cycle counts across all polled symbols
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub written: usize,
    pub rows: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl IngestReport {
    fn record(&mut self, outcome: IngestOutcome) {
        match outcome {
            IngestOutcome::Written(rows) => {
                self.written += 1;
                self.rows += rows;
            }
            IngestOutcome::Duplicate => self.duplicates += 1,
            IngestOutcome::Rejected => self.rejected += 1,
            IngestOutcome::Failed => self.failed += 1,
        }
    }
}

/// Polls order-book snapshots and appends new ones to the history store
///
/// Symbols are processed one after another; a failure on one symbol is logged
/// and never stops the others. Clones share the per-symbol write locks, so the
/// dedup check and the write stay atomic per symbol across concurrent pollers.
#[derive(Clone)]
pub struct OrderBookIngestor {
    feed: Arc<dyn ExchangeFeed>,
    store: Arc<dyn HistoryStore>,
    retry: RetryPolicy,
    symbol_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl OrderBookIngestor {
    pub fn new(feed: Arc<dyn ExchangeFeed>, store: Arc<dyn HistoryStore>, retry: RetryPolicy) -> Self {
        Self {
            feed,
            store,
            retry,
            symbol_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fetch and persist one snapshot per symbol
    pub async fn poll_once(&self, symbols: &[String], depth: u16) -> IngestReport {
        let mut report = IngestReport::default();

        for symbol in symbols {
            let outcome = match self.poll_symbol(symbol, depth).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(symbol = %symbol, "Order book write failed: {}", e);
                    IngestOutcome::Failed
                }
            };
            report.record(outcome);
        }

        tracing::info!(
            "📚 Order book cycle: {} written ({} rows), {} unchanged, {} rejected, {} failed",
            report.written,
            report.rows,
            report.duplicates,
            report.rejected,
            report.failed
        );

        report
    }

    /// Fetch (with retries), dedup and write a single symbol's snapshot
    ///
    /// Exhausted fetch retries come back as `Ok(IngestOutcome::Failed)`; store
    /// errors are returned as `Err`.
    pub async fn poll_symbol(&self, symbol: &str, depth: u16) -> Result<IngestOutcome> {
        let what = format!("order book {}", symbol);
        let snapshot = match self
            .retry
            .run(&what, || self.feed.fetch_order_book(symbol, depth))
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(symbol = %symbol, "Skipping symbol this cycle: {}", e);
                return Ok(IngestOutcome::Failed);
            }
        };

        if snapshot.is_empty() {
            tracing::warn!(
                symbol = %symbol,
                sequence_id = snapshot.sequence_id,
                "Rejected empty order book snapshot"
            );
            return Ok(IngestOutcome::Rejected);
        }

        if snapshot.symbol != symbol {
            tracing::warn!(
                "Rejected snapshot for {} returned while polling {}",
                snapshot.symbol,
                symbol
            );
            return Ok(IngestOutcome::Rejected);
        }

        let lock = self.symbol_lock(symbol).await;
        let _guard = lock.lock().await;

        let sequence_id = snapshot.sequence_id;
        if self.store.has_snapshot(symbol, sequence_id).await? {
            tracing::debug!(symbol = %symbol, sequence_id, "Order book unchanged");
            return Ok(IngestOutcome::Duplicate);
        }

        let samples = snapshot.into_samples(Utc::now());
        match self.store.insert_snapshot(&samples).await? {
            SnapshotWrite::Inserted(rows) => {
                tracing::debug!(symbol = %symbol, sequence_id, rows, "Order book snapshot stored");
                Ok(IngestOutcome::Written(rows))
            }
            SnapshotWrite::Duplicate => Ok(IngestOutcome::Duplicate),
        }
    }

    async fn symbol_lock(&self, symbol: &str) -> Arc<Mutex<()>> {
        let mut locks = self.symbol_locks.lock().await;
        locks
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
