//! inventory-tracker: daily stock poller
//!
//! Reads stock levels from the warehouse database at the configured time,
//! compares them with the previous day and stores the snapshot locally.
//!
//! ## Usage
//! ```text
//! inventory-tracker [CONFIG_FILE]
//! ```
//!
//! ## Configuration
//! - CONFIG_FILE: TOML or INI file (optional, default `tracker.toml`)
//! - INVENTORY_TRACKER__<SECTION>__<KEY>: overrides any file value
//! - INVENTORY_TRACKER_LOG: `tracing` filter, overrides `logging.level`

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inventory_tracker::clock::SystemClock;
use inventory_tracker::{DataSourceGateway, Scheduler, SchedulerSettings, SqlBackend, SqlSnapshotStore, TrackerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from("tracker.toml"), PathBuf::from);
    let config = TrackerConfig::load(Some(config_path.as_path()))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("INVENTORY_TRACKER_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(config = %config_path.display(), "Starting inventory-tracker");

    let options = config.database.gateway_options();
    let backend = SqlBackend::connect_lazy(config.database.kind, &config.database.connection_url()?, &options)
        .map_err(|e| {
            error!("Failed to configure source database: {}", e);
            e
        })?;

    let clock = Arc::new(SystemClock);
    let gateway = DataSourceGateway::new(Arc::new(backend), options, clock.clone());
    if let Err(e) = gateway.ping().await {
        // The daily cycle retries on its own; an unreachable source is not fatal at startup.
        warn!(error = %e, "Source database not reachable yet");
    }

    let snapshot_db = PathBuf::from(&config.storage.snapshot_db);
    if let Some(parent) = snapshot_db.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let store = SqlSnapshotStore::open_sqlite(&snapshot_db).await.map_err(|e| {
        error!("Failed to open snapshot store: {}", e);
        e
    })?;

    let scheduler = Scheduler::builder(gateway, Arc::new(store))
        .clock(clock)
        .settings(SchedulerSettings::from_config(&config))
        .build();

    let at = config.scheduler.query_time()?;
    scheduler.schedule_daily(at);
    info!(at = %at, "Waiting for the daily poll, Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    scheduler.stop().await;
    Ok(())
}
