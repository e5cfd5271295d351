// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Poll cycle scheduler.
//!
//! The [`Scheduler`] ties the components together:
//! - [`DataSourceGateway`] to read the source database
//! - [`FallbackCoordinator`] for retries and cache replay
//! - [`ChangeDetector`](crate::detector::ChangeDetector) to diff against the previous snapshot
//! - [`SnapshotStore`] for history and retention
//!
//! # Lifecycle
//!
//! ```text
//! Idle → Running → Succeeded | Degraded | Failed → Idle
//! ```
//!
//! At most one cycle runs at a time. A manual [`run_now`](Scheduler::run_now)
//! during a cycle is rejected with [`SchedulerError::Busy`]; a timer firing
//! during a cycle is skipped.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use inventory_tracker::coordinator::{Scheduler, SchedulerSettings};
//! use inventory_tracker::gateway::{DataSourceGateway, BackendKind, SqlBackend, GatewayOptions};
//! use inventory_tracker::storage::memory::InMemorySnapshotStore;
//! use inventory_tracker::clock::SystemClock;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let clock = Arc::new(SystemClock);
//! let backend = SqlBackend::connect_lazy(BackendKind::Mysql, "mysql://tracker@db/lager", &GatewayOptions::default()).unwrap();
//! let gateway = DataSourceGateway::new(Arc::new(backend), GatewayOptions::default(), clock.clone());
//! let scheduler = Scheduler::builder(gateway, Arc::new(InMemorySnapshotStore::new()))
//!     .clock(clock)
//!     .settings(SchedulerSettings::default())
//!     .build();
//!
//! scheduler.schedule_daily(chrono::NaiveTime::from_hms_opt(23, 0, 0).unwrap());
//! let summary = scheduler.run_now().await.unwrap();
//! println!("{} changes", summary.counts.changed());
//! scheduler.stop().await;
//! # }
//! ```

pub mod types;
mod lifecycle;
mod pipeline;

pub use types::{CycleState, CycleTrigger, PollAttempt, PollOutcome};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::config::TrackerConfig;
use crate::events::{EventSink, TracingSink};
use crate::gateway::DataSourceGateway;
use crate::notify::{CycleSummary, LogNotifier, Notifier};
use crate::resilience::fallback::FallbackCoordinator;
use crate::resilience::retry::RetryPolicy;
use crate::resilience::shutdown::ShutdownTrigger;
use crate::storage::traits::SnapshotStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("A poll cycle is already running")]
    Busy,
    #[error("Scheduler has been stopped")]
    Stopped,
}

/// Cycle tuning, usually derived from [`TrackerConfig`].
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub retry: RetryPolicy,
    /// Percent change at which an event is highlighted
    pub highlight_threshold: f64,
    /// Snapshots older than this many days are purged after a stored cycle
    pub retention_days: u32,
    /// Delay before re-polling after a degraded cycle; `None` disables resync
    pub resync_after: Option<Duration>,
    pub max_resyncs: u32,
    pub attempt_log_len: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            highlight_threshold: 10.0,
            retention_days: 90,
            resync_after: Some(Duration::from_secs(3600)),
            max_resyncs: 3,
            attempt_log_len: 32,
        }
    }
}

impl SchedulerSettings {
    #[must_use]
    pub fn from_config(config: &TrackerConfig) -> Self {
        Self {
            retry: config.scheduler.retry_policy(),
            highlight_threshold: config.report.highlight_threshold,
            retention_days: config.scheduler.max_data_age_days,
            resync_after: config.scheduler.resync_after(),
            max_resyncs: config.scheduler.max_resyncs,
            attempt_log_len: config.scheduler.attempt_log_len.max(1),
        }
    }
}

/// Shared between the scheduler handle and its timer tasks.
pub(super) struct Inner {
    pub(super) gateway: DataSourceGateway,
    pub(super) store: Arc<dyn SnapshotStore>,
    pub(super) fallback: FallbackCoordinator,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) events: Arc<dyn EventSink>,
    pub(super) notifier: Arc<dyn Notifier>,
    pub(super) settings: SchedulerSettings,

    /// Scheduler state (broadcast to watchers)
    pub(super) state: watch::Sender<CycleState>,

    /// Single-cycle guard
    pub(super) cycle_lock: tokio::sync::Mutex<()>,

    pub(super) attempts: Mutex<VecDeque<PollAttempt>>,

    /// Consecutive resyncs since the last daily or manual cycle
    pub(super) resyncs: AtomicU32,

    pub(super) shutdown: ShutdownTrigger,
    pub(super) stopped: AtomicBool,

    /// Daily timer: its own cancel switch plus the task
    pub(super) daily: Mutex<Option<(ShutdownTrigger, JoinHandle<()>)>>,
    pub(super) resync: Mutex<Option<(ShutdownTrigger, JoinHandle<()>)>>,
}

/// Drives poll cycles on a daily timer and on demand.
///
/// Cheap to share: clone the `Arc` you keep it in, or call methods through `&self`.
pub struct Scheduler {
    pub(super) inner: Arc<Inner>,
}

pub struct SchedulerBuilder {
    gateway: DataSourceGateway,
    store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    notifier: Arc<dyn Notifier>,
    settings: SchedulerSettings,
}

impl SchedulerBuilder {
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub fn settings(mut self, settings: SchedulerSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn build(self) -> Scheduler {
        let (state, _rx) = watch::channel(CycleState::Idle);
        let fallback = FallbackCoordinator::new(self.store.clone(), self.clock.clone(), self.events.clone());
        Scheduler {
            inner: Arc::new(Inner {
                gateway: self.gateway,
                store: self.store,
                fallback,
                clock: self.clock,
                events: self.events,
                notifier: self.notifier,
                attempts: Mutex::new(VecDeque::with_capacity(self.settings.attempt_log_len)),
                settings: self.settings,
                state,
                cycle_lock: tokio::sync::Mutex::new(()),
                resyncs: AtomicU32::new(0),
                shutdown: ShutdownTrigger::new(),
                stopped: AtomicBool::new(false),
                daily: Mutex::new(None),
                resync: Mutex::new(None),
            }),
        }
    }
}

impl Scheduler {
    /// Start building a scheduler. Defaults: system clock, `tracing` events,
    /// log notifier, default settings.
    pub fn builder(gateway: DataSourceGateway, store: Arc<dyn SnapshotStore>) -> SchedulerBuilder {
        SchedulerBuilder {
            gateway,
            store,
            clock: Arc::new(SystemClock),
            events: Arc::new(TracingSink),
            notifier: Arc::new(LogNotifier),
            settings: SchedulerSettings::default(),
        }
    }

    /// Get current scheduler state.
    #[must_use]
    pub fn state(&self) -> CycleState {
        *self.inner.state.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<CycleState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == CycleState::Running
    }

    /// Last poll attempts, oldest first.
    #[must_use]
    pub fn recent_attempts(&self) -> Vec<PollAttempt> {
        self.inner.attempts.lock().iter().cloned().collect()
    }

    /// Outcome state of the most recent cycle, if any ran.
    #[must_use]
    pub fn last_state(&self) -> Option<CycleState> {
        self.inner.attempts.lock().back().map(|a| a.state)
    }

    #[must_use]
    pub fn settings(&self) -> &SchedulerSettings {
        &self.inner.settings
    }

    /// Run one cycle immediately.
    ///
    /// Rejected with [`SchedulerError::Busy`] while another cycle runs.
    pub async fn run_now(&self) -> Result<CycleSummary, SchedulerError> {
        self.inner.run_exclusive(CycleTrigger::Manual).await
    }
}
