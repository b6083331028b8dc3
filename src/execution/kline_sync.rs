use crate::api::{ExchangeFeed, RetryPolicy, CANDLE_INTERVAL};
use crate::db::HistoryStore;
use crate::Result;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub synced: usize,
    pub candles: usize,
    pub failed: usize,
}

/// Keeps the 5-minute kline series in the history store current
///
/// The exchange returns the in-progress candle too; it is upserted on every
/// sync until it closes.
#[derive(Clone)]
pub struct KlineSync {
    feed: Arc<dyn ExchangeFeed>,
    store: Arc<dyn HistoryStore>,
    retry: RetryPolicy,
    limit: u16,
}

impl KlineSync {
    pub fn new(
        feed: Arc<dyn ExchangeFeed>,
        store: Arc<dyn HistoryStore>,
        retry: RetryPolicy,
        limit: u16,
    ) -> Self {
        Self {
            feed,
            store,
            retry,
            limit,
        }
    }

    pub async fn sync_once(&self, symbols: &[String]) -> SyncReport {
        let mut report = SyncReport::default();

        for symbol in symbols {
            match self.sync_symbol(symbol).await {
                Ok(count) => {
                    report.synced += 1;
                    report.candles += count;
                }
                Err(e) => {
                    tracing::warn!(symbol = %symbol, "Kline sync failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "🕯️ Kline sync: {} symbols, {} candles, {} failed",
            report.synced,
            report.candles,
            report.failed
        );

        report
    }

    /// Fetch and upsert one symbol's series; returns the number of candles written
    pub async fn sync_symbol(&self, symbol: &str) -> Result<usize> {
        let what = format!("klines {}", symbol);
        let candles = self
            .retry
            .run(&what, || {
                self.feed.fetch_candles(symbol, CANDLE_INTERVAL, self.limit)
            })
            .await?;

        if candles.is_empty() {
            tracing::debug!(symbol = %symbol, "No klines returned");
            return Ok(0);
        }

        self.store.save_candles(&candles).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{Candle, OrderBookSnapshot};
    use crate::Error;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    /// Serves a fixed series for every symbol except `broken`
    struct CandleFeed {
        closes: Vec<i64>,
        broken: &'static str,
    }

    #[async_trait]
    impl ExchangeFeed for CandleFeed {
        async fn fetch_order_book(&self, _symbol: &str, _depth: u16) -> Result<OrderBookSnapshot> {
            Err(Error::Fetch("not scripted".to_string()))
        }

        async fn fetch_candles(&self, symbol: &str, interval: &str, limit: u16) -> Result<Vec<Candle>> {
            assert_eq!(interval, "5m");
            if symbol == self.broken {
                return Err(Error::Fetch(format!("{} unavailable", symbol)));
            }

            let start = Utc::now() - Duration::minutes(5 * self.closes.len() as i64);
            Ok(self
                .closes
                .iter()
                .take(limit as usize)
                .enumerate()
                .map(|(i, close)| {
                    let open_time = start + Duration::minutes(5 * i as i64);
                    Candle {
                        symbol: symbol.to_string(),
                        open_time,
                        close_time: open_time + Duration::minutes(5),
                        close: Decimal::from(*close),
                    }
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_sync_isolates_failing_symbol() {
        let store = MemoryStore::new();
        let feed = Arc::new(CandleFeed {
            closes: vec![100, 102, 98, 90],
            broken: "BADBTC",
        });
        let sync = KlineSync::new(feed, Arc::new(store.clone()), RetryPolicy::immediate(2), 1000);

        let symbols = vec!["BADBTC".to_string(), "ABCXYZ".to_string()];
        let report = sync.sync_once(&symbols).await;

        assert_eq!(report.synced, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.candles, 4);

        let stored = store.recent_candles("ABCXYZ", 10).await.unwrap();
        assert_eq!(stored.len(), 4);
        assert_eq!(stored[3].close, Decimal::from(90));
    }

    #[tokio::test]
    async fn test_sync_respects_limit() {
        let store = MemoryStore::new();
        let feed = Arc::new(CandleFeed {
            closes: (0..50).collect(),
            broken: "",
        });
        let sync = KlineSync::new(feed, Arc::new(store.clone()), RetryPolicy::immediate(0), 20);

        let written = sync.sync_symbol("ABCXYZ").await.unwrap();
        assert_eq!(written, 20);
    }
}
