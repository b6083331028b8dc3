use super::{snapshot_key, HistoryStore, OrderLedger, SnapshotWrite};
use crate::models::{BookSide, Candle, FilledTotals, OrderBookSample, OrderSide, Project};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone)]
struct Fill {
    project_id: i64,
    side: OrderSide,
    quantity: Decimal,
    price: Decimal,
}

#[derive(Debug, Clone)]
struct StoredProject {
    project: Project,
    closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    /// Insertion order stands in for the surrogate id
    order_book: Vec<OrderBookSample>,
    candles: HashMap<String, BTreeMap<DateTime<Utc>, Candle>>,
    projects: BTreeMap<i64, StoredProject>,
    fills: Vec<Fill>,
}

/// Thread-safe in-process store implementing `HistoryStore` and `OrderLedger`
///
/// All state sits behind one lock, so the dedup check and the batch write of a
/// snapshot happen atomically.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>> {
        self.data.read().map_err(|e| Error::Store(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>> {
        self.data.write().map_err(|e| Error::Store(e.to_string()))
    }

    /// Insert or replace a project row (open)
    pub fn add_project(&self, project: Project) -> Result<()> {
        let mut data = self.write()?;
        data.projects.insert(
            project.id,
            StoredProject {
                project,
                closed_at: None,
            },
        );
        Ok(())
    }

    /// Record a filled, done order for a project
    pub fn record_fill(
        &self,
        project_id: i64,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<()> {
        let mut data = self.write()?;
        data.fills.push(Fill {
            project_id,
            side,
            quantity,
            price,
        });
        Ok(())
    }

    /// Stored project row, open or closed
    pub fn project(&self, project_id: i64) -> Result<Option<Project>> {
        let data = self.read()?;
        Ok(data.projects.get(&project_id).map(|p| p.project.clone()))
    }

    pub fn is_closed(&self, project_id: i64) -> Result<bool> {
        let data = self.read()?;
        Ok(data
            .projects
            .get(&project_id)
            .map(|p| p.closed_at.is_some())
            .unwrap_or(false))
    }

    /// All order-book rows for a symbol in write order
    pub fn snapshot_rows(&self, symbol: &str) -> Result<Vec<OrderBookSample>> {
        let data = self.read()?;
        Ok(data
            .order_book
            .iter()
            .filter(|s| s.symbol == symbol)
            .cloned()
            .collect())
    }

    /// Append a single order-book row as-is (seeding price history in tests)
    pub fn push_sample(&self, sample: OrderBookSample) -> Result<()> {
        let mut data = self.write()?;
        data.order_book.push(sample);
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn has_snapshot(&self, symbol: &str, sequence_id: i64) -> Result<bool> {
        let data = self.read()?;
        Ok(data
            .order_book
            .iter()
            .any(|s| s.symbol == symbol && s.sequence_id == sequence_id))
    }

    async fn insert_snapshot(&self, samples: &[OrderBookSample]) -> Result<SnapshotWrite> {
        let (symbol, sequence_id) = snapshot_key(samples)?;

        let mut data = self.write()?;
        if data
            .order_book
            .iter()
            .any(|s| s.symbol == symbol && s.sequence_id == sequence_id)
        {
            return Ok(SnapshotWrite::Duplicate);
        }

        data.order_book.extend_from_slice(samples);
        Ok(SnapshotWrite::Inserted(samples.len()))
    }

    async fn latest_bid(&self, symbol: &str) -> Result<Option<OrderBookSample>> {
        let data = self.read()?;
        Ok(data
            .order_book
            .iter()
            .rev()
            .find(|s| s.symbol == symbol && s.side == BookSide::Bid)
            .cloned())
    }

    async fn save_candles(&self, candles: &[Candle]) -> Result<usize> {
        let mut data = self.write()?;

        for candle in candles {
            data.candles
                .entry(candle.symbol.clone())
                .or_default()
                .insert(candle.open_time, candle.clone());
        }

        Ok(candles.len())
    }

    async fn recent_candles(&self, symbol: &str, limit: usize) -> Result<Vec<Candle>> {
        let data = self.read()?;

        Ok(data
            .candles
            .get(symbol)
            .map(|series| series.values().rev().take(limit).rev().cloned().collect())
            .unwrap_or_default())
    }

    async fn load_active_projects(&self) -> Result<Vec<Project>> {
        let data = self.read()?;
        Ok(data
            .projects
            .values()
            .filter(|p| p.closed_at.is_none())
            .map(|p| p.project.clone())
            .collect())
    }

    async fn update_project_roi(&self, project: &Project) -> Result<()> {
        let mut data = self.write()?;
        let stored = data
            .projects
            .get_mut(&project.id)
            .ok_or_else(|| Error::Store(format!("Project {} not found", project.id)))?;

        stored.project.roi = project.roi;
        stored.project.balance_base = project.balance_base;
        stored.project.balance_quote = project.balance_quote;
        Ok(())
    }

    async fn close_project(&self, project_id: i64, closed_at: DateTime<Utc>) -> Result<()> {
        let mut data = self.write()?;
        let stored = data
            .projects
            .get_mut(&project_id)
            .ok_or_else(|| Error::Store(format!("Project {} not found", project_id)))?;

        stored.closed_at = Some(closed_at);
        Ok(())
    }
}

#[async_trait]
impl OrderLedger for MemoryStore {
    async fn sum_filled_orders(&self, project_id: i64, side: OrderSide) -> Result<FilledTotals> {
        let data = self.read()?;

        Ok(data
            .fills
            .iter()
            .filter(|f| f.project_id == project_id && f.side == side)
            .fold(FilledTotals::default(), |mut totals, f| {
                totals.quantity += f.quantity;
                totals.quote_amount += f.quantity * f.price;
                totals
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn create_test_sample(symbol: &str, sequence_id: i64, side: BookSide, price: i64) -> OrderBookSample {
        OrderBookSample {
            sequence_id,
            symbol: symbol.to_string(),
            side,
            price: Decimal::from(price),
            quantity: Decimal::ONE,
            captured_at: Utc::now(),
        }
    }

    fn create_test_candle(symbol: &str, open_time: DateTime<Utc>, close: i64) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            open_time,
            close_time: open_time + Duration::minutes(5),
            close: Decimal::from(close),
        }
    }

    #[tokio::test]
    async fn test_insert_snapshot_dedup() {
        let store = MemoryStore::new();
        let samples = vec![
            create_test_sample("KEYBTC", 5, BookSide::Bid, 99),
            create_test_sample("KEYBTC", 5, BookSide::Ask, 101),
        ];

        assert_eq!(
            store.insert_snapshot(&samples).await.unwrap(),
            SnapshotWrite::Inserted(2)
        );
        assert_eq!(
            store.insert_snapshot(&samples).await.unwrap(),
            SnapshotWrite::Duplicate
        );
        assert!(store.has_snapshot("KEYBTC", 5).await.unwrap());
        assert!(!store.has_snapshot("KEYBTC", 6).await.unwrap());
        assert_eq!(store.snapshot_rows("KEYBTC").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_insert_snapshot_rejects_mixed_batch() {
        let store = MemoryStore::new();
        let samples = vec![
            create_test_sample("KEYBTC", 5, BookSide::Bid, 99),
            create_test_sample("KEYBTC", 6, BookSide::Ask, 101),
        ];

        assert!(store.insert_snapshot(&samples).await.is_err());
        assert!(store.insert_snapshot(&[]).await.is_err());
        assert!(store.snapshot_rows("KEYBTC").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_latest_bid_is_last_written_bid() {
        let store = MemoryStore::new();
        store
            .insert_snapshot(&[
                create_test_sample("KEYBTC", 1, BookSide::Bid, 98),
                create_test_sample("KEYBTC", 1, BookSide::Bid, 99),
                create_test_sample("KEYBTC", 1, BookSide::Ask, 101),
            ])
            .await
            .unwrap();

        let bid = store.latest_bid("KEYBTC").await.unwrap().unwrap();
        assert_eq!(bid.price, Decimal::from(99));
        assert!(store.latest_bid("ETHBTC").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recent_candles_oldest_first() {
        let store = MemoryStore::new();
        let start = Utc::now() - Duration::hours(1);
        let candles: Vec<_> = (0..5)
            .map(|i| create_test_candle("KEYBTC", start + Duration::minutes(5 * i), 100 + i))
            .collect();
        store.save_candles(&candles).await.unwrap();

        let recent = store.recent_candles("KEYBTC", 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].close, Decimal::from(102));
        assert_eq!(recent[2].close, Decimal::from(104));

        // Upsert replaces the in-progress candle
        store
            .save_candles(&[create_test_candle("KEYBTC", start + Duration::minutes(20), 90)])
            .await
            .unwrap();
        let recent = store.recent_candles("KEYBTC", 1).await.unwrap();
        assert_eq!(recent[0].close, Decimal::from(90));
    }

    #[tokio::test]
    async fn test_ledger_sums() {
        let store = MemoryStore::new();
        store
            .record_fill(1, OrderSide::Buy, Decimal::from(10), Decimal::from(2))
            .unwrap();
        store
            .record_fill(1, OrderSide::Buy, Decimal::from(5), Decimal::from(4))
            .unwrap();
        store
            .record_fill(2, OrderSide::Buy, Decimal::from(1), Decimal::from(1))
            .unwrap();

        let buys = store.sum_filled_orders(1, OrderSide::Buy).await.unwrap();
        assert_eq!(buys.quantity, Decimal::from(15));
        assert_eq!(buys.quote_amount, Decimal::from(40));

        let sells = store.sum_filled_orders(1, OrderSide::Sell).await.unwrap();
        assert_eq!(sells, FilledTotals::default());
    }
}
