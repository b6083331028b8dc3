use super::RoiEngine;
use crate::models::Project;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Thresholds for automatic project exits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuitRules {
    pub stop_loss_roi: f64,
    pub take_profit_roi: f64,
    pub max_age_hours: i64,
    pub loss_window_hours: f64,
    pub stall_window_hours: f64,
    pub long_stall_window_hours: f64,
    pub min_stall_gain: f64,
}

impl Default for QuitRules {
    fn default() -> Self {
        Self {
            stop_loss_roi: -0.20,         // -20% total
            take_profit_roi: 0.40,        // +40% total
            max_age_hours: 12,            // projects live at most 12h
            loss_window_hours: 1.0,       // any loss in the last hour
            stall_window_hours: 3.0,      // < +5% in the last 3 hours
            long_stall_window_hours: 6.0, // < +5% in the last 6 hours
            min_stall_gain: 0.05,
        }
    }
}

/// Which rule produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuitReason {
    ForceQuit,
    Protected,
    StopLoss,
    TakeProfit,
    Expired,
    HourlyLoss,
    ThreeHourStall,
    SixHourStall,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuitDecision {
    pub should_quit: bool,
    pub blacklist: bool,
    pub reason: QuitReason,
}

impl QuitDecision {
    fn quit(reason: QuitReason, blacklist: bool) -> Self {
        Self {
            should_quit: true,
            blacklist,
            reason,
        }
    }

    fn hold(reason: QuitReason) -> Self {
        Self {
            should_quit: false,
            blacklist: false,
            reason,
        }
    }
}

/// Per-project exit decision
///
/// Rules are evaluated in strict priority order and the first match wins:
/// 1. force_quit -> quit
/// 2. quit_protect -> hold (only force_quit overrides it)
/// 3. roi <= -20% -> quit + blacklist
/// 4. roi >= +40% -> quit
/// 5. older than 12h -> quit
/// 6. 1h ROI delta < 0 -> quit + blacklist
/// 7. 3h ROI delta < 5% -> quit + blacklist
/// 8. 6h ROI delta < 5% -> quit + blacklist
/// 9. otherwise hold
///
/// A missing windowed ROI (cold start) never triggers rules 6-8.
#[derive(Clone)]
pub struct QuitDecisionEngine {
    roi: RoiEngine,
    rules: QuitRules,
}

impl QuitDecisionEngine {
    pub fn new(roi: RoiEngine, rules: QuitRules) -> Self {
        Self { roi, rules }
    }

    pub fn rules(&self) -> &QuitRules {
        &self.rules
    }

    /// Decide for live trading (uses current time)
    pub async fn decide(&self, project: &Project) -> Result<QuitDecision> {
        self.decide_at(project, Utc::now()).await
    }

    /// Decide with an explicit clock
    pub async fn decide_at(&self, project: &Project, now: DateTime<Utc>) -> Result<QuitDecision> {
        if project.force_quit {
            return Ok(QuitDecision::quit(QuitReason::ForceQuit, false));
        }

        if project.quit_protect {
            return Ok(QuitDecision::hold(QuitReason::Protected));
        }

        if project.roi <= self.rules.stop_loss_roi {
            return Ok(QuitDecision::quit(QuitReason::StopLoss, true));
        }

        if project.roi >= self.rules.take_profit_roi {
            return Ok(QuitDecision::quit(QuitReason::TakeProfit, false));
        }

        if project.age_at(now) > chrono::Duration::hours(self.rules.max_age_hours) {
            return Ok(QuitDecision::quit(QuitReason::Expired, false));
        }

        let symbol = project.symbol.as_str();

        if let Some(roi) = self.roi.latest_roi(symbol, self.rules.loss_window_hours).await? {
            if roi.roi_delta < 0.0 {
                return Ok(QuitDecision::quit(QuitReason::HourlyLoss, true));
            }
        }

        if let Some(roi) = self.roi.latest_roi(symbol, self.rules.stall_window_hours).await? {
            if roi.roi_delta < self.rules.min_stall_gain {
                return Ok(QuitDecision::quit(QuitReason::ThreeHourStall, true));
            }
        }

        if let Some(roi) = self
            .roi
            .latest_roi(symbol, self.rules.long_stall_window_hours)
            .await?
        {
            if roi.roi_delta < self.rules.min_stall_gain {
                return Ok(QuitDecision::quit(QuitReason::SixHourStall, true));
            }
        }

        Ok(QuitDecision::hold(QuitReason::Hold))
    }
}
