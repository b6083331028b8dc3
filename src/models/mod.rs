use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Side of an order-book level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BookSide {
    Bid,
    Ask,
}

impl BookSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookSide::Bid => "Bid",
            BookSide::Ask => "Ask",
        }
    }
}

impl FromStr for BookSide {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Bid" => Ok(BookSide::Bid),
            "Ask" => Ok(BookSide::Ask),
            other => Err(Error::InvalidData(format!("Unknown book side: {}", other))),
        }
    }
}

/// One price level as returned by the exchange
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

/// Order-book snapshot fetched from the exchange (not yet persisted)
///
/// Bids arrive best-first (highest price first), asks best-first (lowest first).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderBookSnapshot {
    pub symbol: String,
    pub sequence_id: i64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl OrderBookSnapshot {
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Flatten into persisted rows: bids lowest-first, then asks in natural order.
    ///
    /// The last bid row is therefore the highest bid of the snapshot.
    pub fn into_samples(self, captured_at: DateTime<Utc>) -> Vec<OrderBookSample> {
        let mut samples = Vec::with_capacity(self.bids.len() + self.asks.len());

        let rows = self
            .bids
            .iter()
            .rev()
            .map(|level| (BookSide::Bid, level))
            .chain(self.asks.iter().map(|level| (BookSide::Ask, level)));

        for (side, level) in rows {
            samples.push(OrderBookSample {
                sequence_id: self.sequence_id,
                symbol: self.symbol.clone(),
                side,
                price: level.price,
                quantity: level.quantity,
                captured_at,
            });
        }

        samples
    }
}

/// A persisted order-book row. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderBookSample {
    pub sequence_id: i64,
    pub symbol: String,
    pub side: BookSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub captured_at: DateTime<Utc>,
}

/// 5-minute kline; only the close price is used for ROI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub symbol: String,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub close: Decimal,
}

/// Open trading allocation ("project") tracked for ROI and auto-exit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: i64,
    pub symbol: String,
    pub initial_balance_quote: Decimal,
    pub balance_base: Decimal,  // derived every cycle
    pub balance_quote: Decimal, // derived every cycle
    pub roi: f64,               // derived every cycle
    pub created_at: DateTime<Utc>,
    pub force_quit: bool,
    pub quit_protect: bool,
    pub client_order_id: String,
    pub order_id: i64,
}

impl Project {
    /// Time since the project was created
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }

    /// Reject ROI writes for rows that cannot be a real project
    pub fn validate_for_update(&self) -> Result<()> {
        if self.client_order_id.is_empty() || self.order_id == 0 || self.id < 0 {
            return Err(Error::InvalidData(format!(
                "Project {} not updatable (client_order_id={:?}, order_id={})",
                self.id, self.client_order_id, self.order_id
            )));
        }
        Ok(())
    }
}

/// Windowed price-only return, computed fresh per request
#[derive(Debug, Clone, PartialEq)]
pub struct RoiResult {
    pub symbol: String,
    pub window_hours: f64,
    pub roi_delta: f64,
}

/// Side of a ledger order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sum of filled orders on one side of a project
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FilledTotals {
    pub quantity: Decimal,
    pub quote_amount: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::FromPrimitive;

    fn dec(v: f64) -> Decimal {
        Decimal::from_f64(v).unwrap()
    }

    fn create_test_project() -> Project {
        Project {
            id: 7,
            symbol: "KEYBTC".to_string(),
            initial_balance_quote: dec(1.0),
            balance_base: Decimal::ZERO,
            balance_quote: dec(1.0),
            roi: 0.0,
            created_at: Utc::now(),
            force_quit: false,
            quit_protect: false,
            client_order_id: "abc123".to_string(),
            order_id: 42,
        }
    }

    #[test]
    fn test_into_samples_orders_bids_lowest_first() {
        let snapshot = OrderBookSnapshot {
            symbol: "KEYBTC".to_string(),
            sequence_id: 1001,
            bids: vec![
                PriceLevel::new(dec(0.30), dec(10.0)),
                PriceLevel::new(dec(0.29), dec(20.0)),
            ],
            asks: vec![
                PriceLevel::new(dec(0.31), dec(5.0)),
                PriceLevel::new(dec(0.32), dec(6.0)),
            ],
        };

        let samples = snapshot.into_samples(Utc::now());

        let prices: Vec<_> = samples.iter().map(|s| (s.side, s.price)).collect();
        assert_eq!(
            prices,
            vec![
                (BookSide::Bid, dec(0.29)),
                (BookSide::Bid, dec(0.30)),
                (BookSide::Ask, dec(0.31)),
                (BookSide::Ask, dec(0.32)),
            ]
        );
        assert!(samples.iter().all(|s| s.sequence_id == 1001));
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = OrderBookSnapshot {
            symbol: "KEYBTC".to_string(),
            sequence_id: 1,
            bids: vec![],
            asks: vec![],
        };
        assert!(snapshot.is_empty());
        assert!(snapshot.into_samples(Utc::now()).is_empty());
    }

    #[test]
    fn test_book_side_parse() {
        assert_eq!("Bid".parse::<BookSide>().unwrap(), BookSide::Bid);
        assert_eq!("Ask".parse::<BookSide>().unwrap(), BookSide::Ask);
        assert!("Na".parse::<BookSide>().is_err());
    }

    #[test]
    fn test_validate_for_update() {
        let project = create_test_project();
        assert!(project.validate_for_update().is_ok());

        let mut missing_client_id = create_test_project();
        missing_client_id.client_order_id.clear();
        assert!(missing_client_id.validate_for_update().is_err());

        let mut zero_order_id = create_test_project();
        zero_order_id.order_id = 0;
        assert!(zero_order_id.validate_for_update().is_err());

        let mut negative_id = create_test_project();
        negative_id.id = -1;
        assert!(negative_id.validate_for_update().is_err());
    }

    #[test]
    fn test_project_age() {
        let mut project = create_test_project();
        let now = Utc::now();
        project.created_at = now - chrono::Duration::hours(13);
        assert_eq!(project.age_at(now).num_hours(), 13);
    }
}
