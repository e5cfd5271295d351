//! Structured operational events.
//!
//! Components report what happened through an injected [`EventSink`] rather
//! than logging directly, so embedders can route events elsewhere and tests
//! can assert on them. [`TracingSink`] is the default and writes each event
//! as one `tracing` record.

use std::time::Duration;

use chrono::NaiveDate;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::coordinator::types::{CycleState, CycleTrigger};
use crate::inventory::LocationId;

#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    CycleStarted {
        cycle_id: String,
        trigger: CycleTrigger,
    },
    AttemptFailed {
        attempt: u32,
        max_attempts: u32,
        error: String,
        /// `None` when no further attempt follows
        retry_in: Option<Duration>,
    },
    PartialFetch {
        unreachable: Vec<LocationId>,
        filled_from: Option<NaiveDate>,
    },
    FallbackEngaged {
        attempts: u32,
        replay_date: Option<NaiveDate>,
        staleness_days: Option<i64>,
    },
    RetryCancelled {
        attempt: u32,
    },
    SnapshotStored {
        date: NaiveDate,
        records: usize,
    },
    StoreFailed {
        operation: &'static str,
        error: String,
    },
    Purged {
        cutoff: NaiveDate,
        snapshots: usize,
        records: u64,
    },
    TriggerSkipped {
        trigger: CycleTrigger,
    },
    ResyncScheduled {
        after: Duration,
        resync: u32,
    },
    CycleFinished {
        cycle_id: String,
        state: CycleState,
        elapsed: Duration,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: TrackerEvent);
}

/// Writes events to `tracing` at a level matching their severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: TrackerEvent) {
        match event {
            TrackerEvent::CycleStarted { cycle_id, trigger } => {
                info!(%cycle_id, %trigger, "Poll cycle started");
            }
            TrackerEvent::AttemptFailed {
                attempt,
                max_attempts,
                error,
                retry_in,
            } => match retry_in {
                Some(delay) => warn!(
                    "Inventory query failed (attempt {}/{}): {}. Retrying in {:?}...",
                    attempt, max_attempts, error, delay
                ),
                None => warn!(
                    "Inventory query failed (attempt {}/{}): {}",
                    attempt, max_attempts, error
                ),
            },
            TrackerEvent::PartialFetch {
                unreachable,
                filled_from,
            } => {
                let ids: Vec<&str> = unreachable.iter().map(LocationId::as_str).collect();
                warn!(unreachable = ?ids, filled_from = ?filled_from, "Partial fetch, gaps filled from cache");
            }
            TrackerEvent::FallbackEngaged {
                attempts,
                replay_date,
                staleness_days,
            } => match replay_date {
                Some(date) => warn!(
                    attempts,
                    %date,
                    staleness_days = staleness_days.unwrap_or_default(),
                    "Retries exhausted, replaying cached snapshot"
                ),
                None => error!(attempts, "Retries exhausted and no cached snapshot to replay"),
            },
            TrackerEvent::RetryCancelled { attempt } => {
                info!(attempt, "Retry wait cancelled by shutdown");
            }
            TrackerEvent::SnapshotStored { date, records } => {
                info!(%date, records, "Snapshot stored");
            }
            TrackerEvent::StoreFailed { operation, error } => {
                error!(operation, %error, "Snapshot store operation failed");
            }
            TrackerEvent::Purged {
                cutoff,
                snapshots,
                records,
            } => {
                info!(%cutoff, snapshots, records, "Retention purge complete");
            }
            TrackerEvent::TriggerSkipped { trigger } => {
                warn!(%trigger, "Trigger skipped: a cycle is already running");
            }
            TrackerEvent::ResyncScheduled { after, resync } => {
                info!(resync, "Degraded cycle, resync scheduled in {:?}", after);
            }
            TrackerEvent::CycleFinished {
                cycle_id,
                state,
                elapsed,
            } => {
                info!(%cycle_id, %state, elapsed_ms = elapsed.as_millis() as u64, "Poll cycle finished");
            }
        }
    }
}

/// Keeps every event in memory. Useful when embedding and in tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TrackerEvent>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<TrackerEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events matching `pred`.
    pub fn count(&self, pred: impl Fn(&TrackerEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: TrackerEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_counts() {
        let sink = RecordingSink::new();
        sink.emit(TrackerEvent::TriggerSkipped {
            trigger: CycleTrigger::Daily,
        });
        sink.emit(TrackerEvent::RetryCancelled { attempt: 2 });

        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.count(|e| matches!(e, TrackerEvent::RetryCancelled { .. })), 1);
    }

    #[test]
    fn test_tracing_sink_accepts_every_event() {
        let sink = TracingSink;
        sink.emit(TrackerEvent::FallbackEngaged {
            attempts: 3,
            replay_date: None,
            staleness_days: None,
        });
        sink.emit(TrackerEvent::PartialFetch {
            unreachable: vec!["3".into()],
            filled_from: None,
        });
    }
}
