use crate::api::CANDLE_INTERVAL_MINUTES;
use crate::db::HistoryStore;
use crate::models::{Candle, RoiResult};
use crate::Result;
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;

/// Shortest lookback window accepted by `RoiEngine::latest_roi`
pub const MIN_WINDOW_HOURS: f64 = 0.5;
/// Longest lookback window accepted by `RoiEngine::latest_roi`
pub const MAX_WINDOW_HOURS: f64 = 120.0;

/// Number of 5-minute candles spanning `window_hours`
///
/// # Example
/// ```
/// use roibot::strategy::candles_in_window;
///
/// assert_eq!(candles_in_window(1.0), 12);
/// assert_eq!(candles_in_window(60.0), 720);
/// ```
pub fn candles_in_window(window_hours: f64) -> usize {
    (window_hours * 60.0 / CANDLE_INTERVAL_MINUTES as f64).round() as usize
}

/// Price-only return across the last `n` candles of a series sorted oldest first
///
/// The newest candle is "now" and the window starts `n - 1` candles before it,
/// so `n` candles span the window. Returns `None` when the series is shorter
/// than `n`, the starting close is zero, or the ratio does not fit a `Decimal`.
pub fn window_delta(candles: &[Candle], n: usize) -> Option<f64> {
    if n == 0 || candles.len() < n {
        return None;
    }

    let now = candles.last()?;
    let start = &candles[candles.len() - n];

    if start.close.is_zero() {
        return None;
    }

    now.close
        .checked_sub(start.close)
        .and_then(|change| change.checked_div(start.close))
        .and_then(|delta| delta.to_f64())
}

/// Windowed ROI over the persisted kline series
///
/// "Now" is the latest known candle for the symbol, not wall-clock time, so
/// feed gaps shift the window rather than shrink it.
#[derive(Clone)]
pub struct RoiEngine {
    store: Arc<dyn HistoryStore>,
}

impl RoiEngine {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    /// ROI delta for `symbol` over the last `window_hours`
    ///
    /// Returns `Ok(None)` for windows outside [0.5, 120] hours and while the
    /// series has not yet accumulated enough candles. Store failures propagate.
    pub async fn latest_roi(&self, symbol: &str, window_hours: f64) -> Result<Option<RoiResult>> {
        if !(MIN_WINDOW_HOURS..=MAX_WINDOW_HOURS).contains(&window_hours) {
            tracing::warn!(
                "ROI window {}h for {} out of range [{}, {}]",
                window_hours,
                symbol,
                MIN_WINDOW_HOURS,
                MAX_WINDOW_HOURS
            );
            return Ok(None);
        }

        let needed = candles_in_window(window_hours);
        let candles = self.store.recent_candles(symbol, needed).await?;

        match window_delta(&candles, needed) {
            Some(roi_delta) => Ok(Some(RoiResult {
                symbol: symbol.to_string(),
                window_hours,
                roi_delta,
            })),
            None => {
                tracing::debug!(
                    "{} {}h ROI unavailable - collecting data ({}/{} candles)",
                    symbol,
                    window_hours,
                    candles.len(),
                    needed
                );
                Ok(None)
            }
        }
    }
}
