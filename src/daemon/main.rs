/**
 * STOCKPIT Sync Daemon Entry Point
 *
 * Runs the offline sync manager against the configured backend, logging
 * every status change until interrupted.
 */
use std::sync::Arc;

use stockpit_sync::config::Config;
use stockpit_sync::offline::open_store;
use stockpit_sync::remote::RestBackend;
use stockpit_sync::shared::SystemClock;
use stockpit_sync::sync::{ProbeConnectivity, SyncManager, SyncStatus};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenv::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .init();

    let config = Config::load()?;
    match config.source() {
        Some(path) => tracing::info!("Loaded configuration from {}", path.display()),
        None => tracing::info!("No configuration file found, using defaults and environment"),
    }

    let app = config.app();
    let store = open_store(app, Arc::new(SystemClock));
    let remote = Arc::new(RestBackend::from_config(app)?);
    let connectivity = Arc::new(ProbeConnectivity::from_config(app)?);
    connectivity.start();

    let manager = Arc::new(SyncManager::new(
        store,
        remote,
        connectivity.clone(),
        config.sync_config(),
    ));
    manager.subscribe(log_status).detach();
    manager.init().await?;

    tracing::info!("Sync daemon running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    manager.destroy().await;
    connectivity.stop();

    let metrics = manager.metrics();
    tracing::info!(
        passes = metrics.total_passes,
        applied = metrics.mutations_applied,
        rejected = metrics.mutations_rejected,
        deferred = metrics.mutations_deferred,
        "Sync totals"
    );
    Ok(())
}

fn log_status(status: &SyncStatus) {
    tracing::info!(
        online = status.is_online,
        syncing = status.is_syncing,
        pending = status.pending_count,
        last_sync = ?status.last_sync_time,
        "Sync status"
    );
    if let Some(error) = &status.error {
        tracing::warn!("Last sync reported: {}", error);
    }
}
