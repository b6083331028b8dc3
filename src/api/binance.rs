use super::ExchangeFeed;
use crate::models::{Candle, OrderBookSnapshot, PriceLevel};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;

pub const BINANCE_API_BASE: &str = "https://api.binance.com";
const REQUESTS_PER_MINUTE: u32 = 1200;
const REQUEST_TIMEOUT_SECS: u64 = 10;

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Client for the public Binance REST market-data endpoints
///
/// Cloneable; all clones share the same rate limiter.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    rate_limiter: Arc<BinanceRateLimiter>,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DepthResponse {
    last_update_id: i64,
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

// ============== Implementation ==============

impl BinanceClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BINANCE_API_BASE)
    }

    /// Point the client at another host (testnet, mock server)
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let quota = Quota::per_minute(NonZeroU32::new(REQUESTS_PER_MINUTE).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    /// Rate-limited GET returning the decoded JSON body
    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(query).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::Fetch(format!("Binance API error ({}): {}", status, body)));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl ExchangeFeed for BinanceClient {
    /// Endpoint: GET /api/v3/depth?symbol={symbol}&limit={depth}
    async fn fetch_order_book(&self, symbol: &str, depth: u16) -> Result<OrderBookSnapshot> {
        let depth: DepthResponse = self
            .get_json(
                "/api/v3/depth",
                &[("symbol", symbol.to_string()), ("limit", depth.to_string())],
            )
            .await?;

        Ok(OrderBookSnapshot {
            symbol: symbol.to_string(),
            sequence_id: depth.last_update_id,
            bids: parse_levels(&depth.bids)?,
            asks: parse_levels(&depth.asks)?,
        })
    }

    /// Endpoint: GET /api/v3/klines?symbol={symbol}&interval={interval}&limit={limit}
    ///
    /// Each kline is an array: [openTime, open, high, low, close, volume, closeTime, ...]
    async fn fetch_candles(&self, symbol: &str, interval: &str, limit: u16) -> Result<Vec<Candle>> {
        let rows: Vec<Vec<serde_json::Value>> = self
            .get_json(
                "/api/v3/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        let mut candles = rows
            .iter()
            .map(|row| parse_kline(symbol, row))
            .collect::<Result<Vec<_>>>()?;
        candles.sort_by_key(|c| c.open_time);

        Ok(candles)
    }
}

fn parse_decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).map_err(|e| Error::InvalidData(format!("Bad decimal {:?}: {}", raw, e)))
}

fn parse_levels(raw: &[(String, String)]) -> Result<Vec<PriceLevel>> {
    raw.iter()
        .map(|(price, quantity)| Ok(PriceLevel::new(parse_decimal(price)?, parse_decimal(quantity)?)))
        .collect()
}

fn millis_at(row: &[serde_json::Value], idx: usize) -> Result<DateTime<Utc>> {
    row.get(idx)
        .and_then(|v| v.as_i64())
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| Error::InvalidData(format!("Kline field {} is not a timestamp", idx)))
}

fn parse_kline(symbol: &str, row: &[serde_json::Value]) -> Result<Candle> {
    let close = row
        .get(4)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InvalidData("Kline close price missing".to_string()))?;

    Ok(Candle {
        symbol: symbol.to_string(),
        open_time: millis_at(row, 0)?,
        close_time: millis_at(row, 6)?,
        close: parse_decimal(close)?,
    })
}
