//! meli-mirror scheduler binary
//!
//! Runs the sync orchestrator either once (`--once`, for cron-style
//! triggers) or on a fixed interval until interrupted. The dashboard talks
//! to the same orchestrator through its own process; the advisory tick lock
//! keeps overlapping invocations from interleaving.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use meli_mirror::infrastructure::config::{defaults, AppConfig};
use meli_mirror::infrastructure::logging::init_logging;
use meli_mirror::infrastructure::{DatabaseConnection, MeliClient};
use meli_mirror::SyncOrchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().await?;
    init_logging(&config.logging)?;

    info!("🚀 meli-mirror {} starting", env!("CARGO_PKG_VERSION"));

    let db = DatabaseConnection::new(&config.database.url).await?;
    db.migrate().await?;

    let client = Arc::new(MeliClient::new(config.marketplace.clone(), config.sync.scan_page_limit)?);
    let orchestrator = SyncOrchestrator::new(db.pool().clone(), client, config.sync.clone());

    if std::env::args().any(|arg| arg == "--once") {
        let response = orchestrator.trigger_sync().await;
        println!("{}", serde_json::to_string_pretty(&response)?);
        if !response.success {
            std::process::exit(1);
        }
        return Ok(());
    }

    // Interval loop with graceful ctrl-c shutdown
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 Shutdown signal received");
            signal_cancel.cancel();
        }
    });

    let mut ticker =
        tokio::time::interval(Duration::from_millis(defaults::SCHEDULER_INTERVAL_MS));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let response = orchestrator.trigger_sync().await;
                if response.success {
                    info!(
                        "⏱️ Tick: {}/{} items, completed={} - {}",
                        response.processed, response.total, response.completed, response.message
                    );
                } else {
                    warn!("⏱️ Tick failed: {}", response.message);
                }
            }
        }
    }

    info!("👋 meli-mirror stopped");
    Ok(())
}
