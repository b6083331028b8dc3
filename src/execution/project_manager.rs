use super::registry::{reconcile, ProjectRegistry};
use crate::db::{HistoryStore, OrderLedger};
use crate::models::{OrderSide, Project};
use crate::risk::ExitHandler;
use crate::strategy::QuitDecisionEngine;
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Per-cycle counts across all active projects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub updated: usize,
    pub stale: usize,
    pub rejected: usize,
    pub failed_writes: usize,
    pub held: usize,
    pub quit: usize,
    pub blacklisted: usize,
}

/// ROI of a project marked at `bid`
///
/// roi = (balance_quote + balance_base * bid) / initial_balance_quote - 1
pub fn compute_roi(
    balance_base: Decimal,
    balance_quote: Decimal,
    initial_balance_quote: Decimal,
    bid: Decimal,
) -> Result<f64> {
    if initial_balance_quote <= Decimal::ZERO {
        return Err(Error::InvalidData(format!(
            "Initial balance must be positive, got {}",
            initial_balance_quote
        )));
    }

    let value = balance_base
        .checked_mul(bid)
        .and_then(|marked| marked.checked_add(balance_quote))
        .ok_or_else(|| {
            Error::InvalidData(format!(
                "Position value overflows: {} base at {} plus {} quote",
                balance_base, bid, balance_quote
            ))
        })?;

    value
        .checked_div(initial_balance_quote)
        .and_then(|ratio| ratio.checked_sub(Decimal::ONE))
        .and_then(|roi| roi.to_f64())
        .ok_or_else(|| Error::InvalidData(format!("ROI out of range for value {}", value)))
}

/// Refreshes balances and ROI of every active project and applies exit decisions
pub struct ProjectManager {
    store: Arc<dyn HistoryStore>,
    ledger: Arc<dyn OrderLedger>,
    decisions: QuitDecisionEngine,
    exits: Arc<dyn ExitHandler>,
    registry: ProjectRegistry,
    max_price_age: Duration,
}

impl ProjectManager {
    pub fn new(
        store: Arc<dyn HistoryStore>,
        ledger: Arc<dyn OrderLedger>,
        decisions: QuitDecisionEngine,
        exits: Arc<dyn ExitHandler>,
        registry: ProjectRegistry,
        max_price_age: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            decisions,
            exits,
            registry,
            max_price_age,
        }
    }

    pub fn registry(&self) -> &ProjectRegistry {
        &self.registry
    }

    pub async fn refresh_cycle(&self) -> Result<CycleReport> {
        self.refresh_cycle_at(Utc::now()).await
    }

    /// One refresh pass with an explicit clock
    ///
    /// Holds the registry lock for the whole pass and first re-reads the active
    /// rows, so operator flags and newly opened projects are seen every cycle.
    /// Failures of a single project are logged and counted; only a ledger query
    /// error aborts the pass, after projects already closed in it have left the
    /// registry.
    pub async fn refresh_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let mut projects = self.registry.lock().await;

        match self.store.load_active_projects().await {
            Ok(active) => {
                let (added, dropped) = reconcile(&mut projects, active);
                if added > 0 || dropped > 0 {
                    tracing::info!("Active projects: {} added, {} no longer active", added, dropped);
                }
            }
            Err(e) => tracing::warn!("Reloading active projects failed, using cached set: {}", e),
        }

        let mut report = CycleReport::default();
        let mut closed: Vec<i64> = Vec::new();
        let mut aborted: Option<Error> = None;

        for project in projects.iter_mut() {
            if let Err(e) = self
                .refresh_project(project, now, &mut report, &mut closed)
                .await
            {
                tracing::error!(
                    project_id = project.id,
                    symbol = %project.symbol,
                    "Ledger query failed, aborting cycle: {}",
                    e
                );
                aborted = Some(e);
                break;
            }
        }

        projects.retain(|p| !closed.contains(&p.id));

        if let Some(e) = aborted {
            return Err(e);
        }

        tracing::info!(
            "📊 Project cycle: {} updated, {} stale, {} rejected, {} write failures, {} held, {} quit ({} blacklisted), {} active",
            report.updated,
            report.stale,
            report.rejected,
            report.failed_writes,
            report.held,
            report.quit,
            report.blacklisted,
            projects.len()
        );

        Ok(report)
    }

    /// Process one project; only a ledger failure is returned as `Err`
    async fn refresh_project(
        &self,
        project: &mut Project,
        now: DateTime<Utc>,
        report: &mut CycleReport,
        closed: &mut Vec<i64>,
    ) -> Result<()> {
        if project.initial_balance_quote <= Decimal::ZERO {
            tracing::warn!(
                project_id = project.id,
                "Skipping project with non-positive initial balance {}",
                project.initial_balance_quote
            );
            report.rejected += 1;
            return Ok(());
        }

        let buys = self.ledger.sum_filled_orders(project.id, OrderSide::Buy).await?;
        let sells = self.ledger.sum_filled_orders(project.id, OrderSide::Sell).await?;

        let bid = match self.store.latest_bid(&project.symbol).await {
            Ok(Some(bid)) => bid,
            Ok(None) => {
                tracing::warn!(project_id = project.id, symbol = %project.symbol, "No bid price yet");
                report.stale += 1;
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(project_id = project.id, symbol = %project.symbol, "Bid lookup failed: {}", e);
                report.stale += 1;
                return Ok(());
            }
        };

        let age = now - bid.captured_at;
        if age > self.max_price_age {
            tracing::warn!(
                project_id = project.id,
                symbol = %project.symbol,
                "Bid price is {}s old, skipping",
                age.num_seconds()
            );
            report.stale += 1;
            return Ok(());
        }

        let balances = buys.quantity.checked_sub(sells.quantity).zip(
            project
                .initial_balance_quote
                .checked_sub(buys.quote_amount)
                .and_then(|quote| quote.checked_add(sells.quote_amount)),
        );
        let (balance_base, balance_quote) = match balances {
            Some(balances) => balances,
            None => {
                tracing::warn!(project_id = project.id, "Ledger totals overflow balance arithmetic");
                report.rejected += 1;
                return Ok(());
            }
        };

        let roi = match compute_roi(balance_base, balance_quote, project.initial_balance_quote, bid.price) {
            Ok(roi) => roi,
            Err(e) => {
                tracing::warn!(project_id = project.id, "ROI not computable: {}", e);
                report.rejected += 1;
                return Ok(());
            }
        };

        project.balance_base = balance_base;
        project.balance_quote = balance_quote;
        project.roi = roi;

        tracing::debug!(
            project_id = project.id,
            symbol = %project.symbol,
            bid = %bid.price,
            "roi {:.4} (base {}, quote {})",
            roi,
            balance_base,
            balance_quote
        );

        match project.validate_for_update() {
            Err(e) => {
                tracing::warn!(project_id = project.id, "ROI update rejected: {}", e);
                report.rejected += 1;
            }
            Ok(()) => match self.store.update_project_roi(project).await {
                Ok(()) => report.updated += 1,
                Err(e) => {
                    tracing::error!(project_id = project.id, "ROI update failed, retrying next cycle: {}", e);
                    report.failed_writes += 1;
                }
            },
        }

        let decision = match self.decisions.decide_at(project, now).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(project_id = project.id, "Quit decision unavailable, holding: {}", e);
                report.held += 1;
                return Ok(());
            }
        };

        if !decision.should_quit {
            report.held += 1;
            return Ok(());
        }

        tracing::info!(
            project_id = project.id,
            symbol = %project.symbol,
            roi = project.roi,
            "🚪 Quit ({:?}, blacklist: {})",
            decision.reason,
            decision.blacklist
        );

        if let Err(e) = self.exits.handle_quit(project, decision.blacklist).await {
            tracing::error!(project_id = project.id, "Exit handling failed, project stays active: {}", e);
            return Ok(());
        }

        if let Err(e) = self.store.close_project(project.id, now).await {
            tracing::error!(project_id = project.id, "Closing project failed, project stays active: {}", e);
            return Ok(());
        }

        closed.push(project.id);
        report.quit += 1;
        if decision.blacklist {
            report.blacklisted += 1;
        }

        Ok(())
    }
}
