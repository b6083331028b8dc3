use anyhow::{Context, Result};
use clap::Parser;
use roibot::api::{BinanceClient, RetryPolicy};
use roibot::app::App;
use roibot::config::Settings;
use roibot::db::PostgresStore;
use std::sync::Arc;
use tokio::sync::watch;

/// Order-book ingestion and ROI-driven project exits
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Settings file (defaults to ./roibot.toml when present)
    #[arg(short, long)]
    config: Option<String>,

    /// Comma-separated symbols, overriding the configured list
    #[arg(short, long, value_delimiter = ',')]
    symbols: Option<Vec<String>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let args = Args::parse();

    let settings = Settings::build(args.config.as_deref()).context("Failed to load settings")?;
    let mut settings = match args.symbols {
        Some(symbols) => settings.with_symbols(symbols),
        None => settings.validate().map(|_| settings),
    }
    .context("Invalid settings")?;
    settings.symbols.sort();
    settings.symbols.dedup();

    tracing::info!("🚀 roibot starting");
    tracing::info!("  Symbols: {}", settings.symbols.join(", "));
    tracing::info!(
        "  Intervals: ingest {}s, klines {}s, manage {}s",
        settings.ingest_interval_secs,
        settings.kline_interval_secs,
        settings.manage_interval_secs
    );

    let store = Arc::new(
        PostgresStore::connect(&settings.database_url, settings.max_connections)
            .await
            .context("Failed to connect to Postgres")?,
    );
    let feed = Arc::new(
        BinanceClient::with_base_url(settings.exchange_base_url.clone())
            .context("Failed to build exchange client")?,
    );

    let app = App::assemble(settings, feed, store.clone(), store, RetryPolicy::default())
        .await
        .context("Failed to restore active projects")?;
    tracing::info!("  Active projects: {}", app.registry().len().await);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = Arc::new(app).spawn_loops(shutdown_rx);

    tracing::info!("✅ Loops running, press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    tracing::info!("⚠️  Received Ctrl+C, finishing current cycles...");

    shutdown_tx.send(true).ok();
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("Loop task failed: {}", e);
        }
    }

    tracing::info!("👋 roibot stopped");
    Ok(())
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("roibot=info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
