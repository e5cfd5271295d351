//! # Inventory Tracker
//!
//! Polls stock levels from a warehouse database once a day, compares them
//! with the previous day and keeps a local history of snapshots.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Scheduler                           │
//! │  • Daily trigger at a configured time, manual run_now()     │
//! │  • One cycle at a time, resync after degraded cycles        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Fallback Coordinator                     │
//! │  • Bounded retries of transient source errors              │
//! │  • Replays the last stored snapshot when retries run out   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Data Source Gateway                      │
//! │  • Pooled, time-bounded queries (MySQL/MariaDB or SQLite)  │
//! │  • Normalizes rows into a Snapshot                         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!            (Snapshot compared, then stored)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │           Change Detector  +  Snapshot Store                │
//! │  • Per article/location change events, percent deltas      │
//! │  • SQLite history with content hash and retention purge    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use inventory_tracker::{
//!     BackendKind, DataSourceGateway, Scheduler, SchedulerSettings, SqlBackend, SqlSnapshotStore, TrackerConfig,
//! };
//! use inventory_tracker::clock::SystemClock;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TrackerConfig::load(Some("tracker.toml".as_ref()))?;
//!     let options = config.database.gateway_options();
//!     let backend = SqlBackend::connect_lazy(config.database.kind, &config.database.connection_url()?, &options)?;
//!
//!     let clock = Arc::new(SystemClock);
//!     let gateway = DataSourceGateway::new(Arc::new(backend), options, clock.clone());
//!     let store = SqlSnapshotStore::open_sqlite(config.storage.snapshot_db.as_ref()).await?;
//!
//!     let scheduler = Scheduler::builder(gateway, Arc::new(store))
//!         .clock(clock)
//!         .settings(SchedulerSettings::from_config(&config))
//!         .build();
//!     scheduler.schedule_daily(config.scheduler.query_time()?);
//!
//!     tokio::signal::ctrl_c().await?;
//!     scheduler.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: the [`Scheduler`] and one poll cycle end to end
//! - [`gateway`]: source database access
//! - [`resilience`]: retry policy, cache fallback, cancellation
//! - [`detector`]: snapshot comparison
//! - [`storage`]: snapshot history (SQL, memory)
//! - [`inventory`]: the data model

pub mod inventory;
pub mod clock;
pub mod config;
pub mod gateway;
pub mod storage;
pub mod resilience;
pub mod detector;
pub mod events;
pub mod notify;
pub mod coordinator;
pub mod metrics;

mod db;

pub use config::{ConfigError, TrackerConfig};
pub use coordinator::{CycleState, CycleTrigger, PollAttempt, PollOutcome, Scheduler, SchedulerError, SchedulerSettings};
pub use detector::{ChangeDetector, ChangeEvent, ChangeSet, Classification, Comparison, PercentDelta};
pub use events::{EventSink, TrackerEvent};
pub use gateway::{BackendKind, DataSourceGateway, GatewayError, GatewayOptions, InventoryBackend, SqlBackend};
pub use inventory::{
    Article, ArticleId, ArticleStatus, Location, LocationId, Provenance, Snapshot, StockRecord, ZeroStock,
};
pub use notify::{CycleSummary, Notifier};
pub use resilience::fallback::{FallbackCoordinator, Outcome};
pub use resilience::retry::RetryPolicy;
pub use storage::{InMemorySnapshotStore, SnapshotStore, SqlSnapshotStore, StorageError};
