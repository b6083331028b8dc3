use crate::api::{ExchangeFeed, RetryPolicy};
use crate::config::Settings;
use crate::db::{HistoryStore, OrderLedger};
use crate::execution::{
    CycleReport, IngestReport, KlineSync, OrderBookIngestor, ProjectManager, ProjectRegistry,
    SyncReport,
};
use crate::risk::Blacklist;
use crate::strategy::{QuitDecisionEngine, QuitRules, RoiEngine};
use crate::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Every long-lived component, wired once at startup and shared by the loops
pub struct App {
    settings: Settings,
    ingestor: OrderBookIngestor,
    kline_sync: KlineSync,
    manager: ProjectManager,
    blacklist: Blacklist,
}

impl App {
    /// Wire components and restore the active projects from `store`
    pub async fn assemble(
        settings: Settings,
        feed: Arc<dyn ExchangeFeed>,
        store: Arc<dyn HistoryStore>,
        ledger: Arc<dyn OrderLedger>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let registry = ProjectRegistry::load(store.as_ref()).await?;
        let blacklist = Blacklist::new(settings.blacklist_cooldown());

        let decisions = QuitDecisionEngine::new(RoiEngine::new(store.clone()), QuitRules::default());
        let manager = ProjectManager::new(
            store.clone(),
            ledger,
            decisions,
            Arc::new(blacklist.clone()),
            registry,
            settings.max_price_age(),
        );

        let ingestor = OrderBookIngestor::new(feed.clone(), store.clone(), retry.clone());
        let kline_sync = KlineSync::new(feed, store, retry, settings.kline_limit);

        Ok(Self {
            settings,
            ingestor,
            kline_sync,
            manager,
            blacklist,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &ProjectRegistry {
        self.manager.registry()
    }

    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    pub async fn run_ingestion_cycle(&self) -> IngestReport {
        self.ingestor
            .poll_once(&self.settings.symbols, self.settings.depth)
            .await
    }

    pub async fn run_kline_cycle(&self) -> SyncReport {
        self.kline_sync.sync_once(&self.settings.symbols).await
    }

    pub async fn run_management_cycle(&self) -> Result<CycleReport> {
        self.manager.refresh_cycle().await
    }

    /// Spawn the ingestion, kline and management loops
    pub fn spawn_loops(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let ingest = {
            let app = self.clone();
            let period = app.settings.ingest_interval();
            tokio::spawn(run_periodic("ingestion", period, shutdown.clone(), move || {
                let app = app.clone();
                async move {
                    app.run_ingestion_cycle().await;
                }
            }))
        };

        let klines = {
            let app = self.clone();
            let period = app.settings.kline_interval();
            tokio::spawn(run_periodic("klines", period, shutdown.clone(), move || {
                let app = app.clone();
                async move {
                    app.run_kline_cycle().await;
                }
            }))
        };

        let manage = {
            let app = self;
            let period = app.settings.manage_interval();
            tokio::spawn(run_periodic("management", period, shutdown, move || {
                let app = app.clone();
                async move {
                    if let Err(e) = app.run_management_cycle().await {
                        tracing::error!("Management cycle aborted: {}", e);
                    }
                }
            }))
        };

        vec![ingest, klines, manage]
    }
}

/// Run `cycle` every `period` until shutdown is signalled
///
/// The flag is only checked between cycles; a running cycle always completes.
/// A closed shutdown channel also stops the loop.
pub async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut cycle: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!("🔄 {} loop started (every {:?})", name, period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        if *shutdown.borrow() {
            break;
        }

        cycle().await;
    }

    tracing::info!("{} loop stopped", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_periodic_loop_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let counter = Arc::new(AtomicUsize::new(0));

        let task = {
            let counter = counter.clone();
            tokio::spawn(run_periodic("test", Duration::from_millis(10), rx, move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }))
        };

        tokio::time::sleep(Duration::from_millis(55)).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        let runs = counter.load(Ordering::SeqCst);
        assert!(runs >= 2, "expected several cycles, got {}", runs);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), runs);
    }

    #[tokio::test]
    async fn test_in_flight_cycle_completes() {
        let (tx, rx) = watch::channel(false);
        let finished = Arc::new(AtomicUsize::new(0));

        let task = {
            let finished = finished.clone();
            tokio::spawn(run_periodic("slow", Duration::from_millis(5), rx, move || {
                let finished = finished.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(40)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                }
            }))
        };

        // Signal while the first cycle is sleeping
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_sender_stops_loop() {
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(run_periodic("orphan", Duration::from_secs(3600), rx, || async {}));

        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
