//! End-of-cycle notification.
//!
//! The scheduler hands every finished cycle to a [`Notifier`] as a
//! [`CycleSummary`]. Rendering reports or mailing them is left to the
//! notifier implementation.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::coordinator::types::{CycleState, CycleTrigger};
use crate::detector::{ChangeCounts, ChangeEvent};
use crate::inventory::{LocationId, Provenance};

/// Everything a report needs about one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleSummary {
    pub cycle_id: String,
    pub trigger: CycleTrigger,
    pub state: CycleState,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
    /// Source queries issued
    pub attempts: u32,
    /// Capture date of the data reported on
    pub capture_date: Option<NaiveDate>,
    pub provenance: Option<Provenance>,
    /// Days between the replayed snapshot and the cycle date
    pub staleness_days: Option<i64>,
    /// Date of the snapshot compared against
    pub reference_date: Option<NaiveDate>,
    /// True on the first run, when there was nothing to compare against
    pub no_prior_data: bool,
    pub counts: ChangeCounts,
    /// Changed events at or above the highlight threshold, most significant first
    pub highlights: Vec<ChangeEvent>,
    pub zero_stock_active: usize,
    pub cached_records: usize,
    pub missing_locations: Vec<LocationId>,
    pub error: Option<String>,
}

impl CycleSummary {
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.state == CycleState::Degraded
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, summary: &CycleSummary);
}

/// Logs one line per cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, summary: &CycleSummary) {
        match summary.state {
            CycleState::Succeeded => info!(
                cycle_id = %summary.cycle_id,
                changed = summary.counts.changed(),
                significant = summary.counts.significant,
                zeroed = summary.counts.zeroed,
                deactivated = summary.counts.deactivated,
                zero_stock_active = summary.zero_stock_active,
                no_prior_data = summary.no_prior_data,
                "Inventory report ready"
            ),
            CycleState::Degraded => warn!(
                cycle_id = %summary.cycle_id,
                provenance = ?summary.provenance,
                staleness_days = ?summary.staleness_days,
                cached_records = summary.cached_records,
                missing = summary.missing_locations.len(),
                "Inventory report built from cached data"
            ),
            _ => warn!(
                cycle_id = %summary.cycle_id,
                error = summary.error.as_deref().unwrap_or("unknown"),
                "No inventory report this cycle"
            ),
        }
    }
}

/// Forwards summaries over a channel, for embedders that render reports themselves.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<CycleSummary>,
}

impl ChannelNotifier {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CycleSummary>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, summary: &CycleSummary) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(summary.clone());
    }
}
