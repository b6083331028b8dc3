pub mod binance;
pub mod retry;

pub use binance::BinanceClient;
pub use retry::RetryPolicy;

use crate::models::{Candle, OrderBookSnapshot};
use crate::Result;
use async_trait::async_trait;

/// Kline interval the ROI windows are measured in
pub const CANDLE_INTERVAL: &str = "5m";
pub const CANDLE_INTERVAL_MINUTES: u32 = 5;

/// Market data the core consumes from the exchange
#[async_trait]
pub trait ExchangeFeed: Send + Sync {
    /// Fetch one order-book snapshot with at most `depth` levels per side
    async fn fetch_order_book(&self, symbol: &str, depth: u16) -> Result<OrderBookSnapshot>;

    /// Fetch the most recent `limit` candles, ordered by open time (oldest first)
    async fn fetch_candles(&self, symbol: &str, interval: &str, limit: u16) -> Result<Vec<Candle>>;
}
