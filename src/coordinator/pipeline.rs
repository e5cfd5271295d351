//! One poll cycle: fetch (with fallback), compare, store, purge, notify.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};
use uuid::Uuid;

use super::{CycleState, CycleTrigger, Inner, PollAttempt, PollOutcome, SchedulerError};
use crate::detector::{ChangeDetector, Comparison};
use crate::events::TrackerEvent;
use crate::inventory::{Provenance, Snapshot};
use crate::metrics::LatencyTimer;
use crate::notify::CycleSummary;
use crate::resilience::fallback::{FallbackError, Outcome};
use crate::storage::traits::{StorageError, WriteMode};

impl CycleState {
    fn metric_code(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Succeeded => 2,
            Self::Degraded => 3,
            Self::Failed => 4,
        }
    }
}

impl Inner {
    /// Run a cycle unless one is already in progress.
    pub(super) async fn run_exclusive(self: &Arc<Self>, trigger: CycleTrigger) -> Result<CycleSummary, SchedulerError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SchedulerError::Stopped);
        }
        let Ok(guard) = self.cycle_lock.try_lock() else {
            if trigger != CycleTrigger::Manual {
                crate::metrics::record_trigger_skipped(&trigger.to_string());
                self.events.emit(TrackerEvent::TriggerSkipped { trigger });
            }
            return Err(SchedulerError::Busy);
        };
        // stop() may have set the flag and released the lock since the check above.
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SchedulerError::Stopped);
        }
        if trigger != CycleTrigger::Resync {
            self.resyncs.store(0, Ordering::SeqCst);
        }

        let summary = self.run_cycle(trigger).await;
        drop(guard);

        if summary.is_degraded() {
            self.schedule_resync();
        } else {
            self.resyncs.store(0, Ordering::SeqCst);
        }
        Ok(summary)
    }

    #[tracing::instrument(skip(self), fields(cycle_id = tracing::field::Empty))]
    async fn run_cycle(&self, trigger: CycleTrigger) -> CycleSummary {
        let cycle_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("cycle_id", cycle_id.as_str());
        let started = Instant::now();
        let started_at = self.clock.now();

        self.set_state(CycleState::Running);
        self.events.emit(TrackerEvent::CycleStarted {
            cycle_id: cycle_id.clone(),
            trigger,
        });

        let outcome = {
            let _timer = LatencyTimer::new("fetch");
            let mut shutdown = self.shutdown.listener();
            self.fallback
                .execute(|| self.gateway.fetch_snapshot(), &self.settings.retry, &mut shutdown)
                .await
        };

        let mut summary = CycleSummary {
            cycle_id: cycle_id.clone(),
            trigger,
            state: CycleState::Failed,
            started_at,
            finished_at: started_at,
            attempts: outcome.attempts(),
            capture_date: None,
            provenance: None,
            staleness_days: None,
            reference_date: None,
            no_prior_data: false,
            counts: Default::default(),
            highlights: Vec::new(),
            zero_stock_active: 0,
            cached_records: 0,
            missing_locations: Vec::new(),
            error: None,
        };

        let poll_outcome = match outcome {
            Outcome::Live { snapshot, .. } => {
                let partial = snapshot.provenance() == Provenance::Partial;
                summary.staleness_days = Some(0);
                let reported = self.report(&mut summary, &snapshot).await;
                let written = match reported {
                    Err(e) if e.is_integrity() => Err(e),
                    _ => self.persist(&mut summary, &snapshot, trigger).await,
                };
                match written {
                    Err(e) if e.is_integrity() => {
                        warn!(error = %e, "Data integrity error, stored history left untouched");
                        summary.state = CycleState::Failed;
                        PollOutcome::PermanentFailure
                    }
                    Err(_) => {
                        summary.state = CycleState::Degraded;
                        PollOutcome::TransientFailure
                    }
                    Ok(()) => {
                        summary.state = if partial || summary.error.is_some() {
                            CycleState::Degraded
                        } else {
                            self.purge().await;
                            CycleState::Succeeded
                        };
                        if partial {
                            PollOutcome::TransientFailure
                        } else {
                            PollOutcome::Success
                        }
                    }
                }
            }
            Outcome::Replayed {
                snapshot,
                staleness,
                cause,
                ..
            } => {
                // Replayed data keeps its own date and is never stored again.
                let reported = self.report(&mut summary, &snapshot).await;
                summary.staleness_days = Some(staleness.age_days);
                match reported {
                    Err(e) if e.is_integrity() => {
                        summary.state = CycleState::Failed;
                        PollOutcome::PermanentFailure
                    }
                    _ => {
                        summary.error = Some(cause.to_string());
                        summary.state = CycleState::Degraded;
                        PollOutcome::Exhausted
                    }
                }
            }
            Outcome::Failed { error, .. } => {
                let poll = match error {
                    FallbackError::Permanent(_) | FallbackError::Merge(_) => PollOutcome::PermanentFailure,
                    FallbackError::Exhausted { .. } | FallbackError::Storage(_) => PollOutcome::Exhausted,
                };
                summary.error = Some(error.to_string());
                summary.state = CycleState::Failed;
                poll
            }
        };

        summary.finished_at = self.clock.now();
        self.record_attempt(PollAttempt {
            cycle_id,
            trigger,
            started_at,
            attempts: summary.attempts,
            outcome: poll_outcome,
            state: summary.state,
        });

        let elapsed = started.elapsed();
        crate::metrics::record_cycle(&trigger.to_string(), &summary.state.to_string());
        crate::metrics::record_cycle_duration(elapsed);
        if let Some(days) = summary.staleness_days {
            crate::metrics::set_staleness_days(days);
        }
        self.set_state(summary.state);
        self.events.emit(TrackerEvent::CycleFinished {
            cycle_id: summary.cycle_id.clone(),
            state: summary.state,
            elapsed,
        });
        self.notifier.notify(&summary);
        self.set_state(CycleState::Idle);

        summary
    }

    /// Compare `snapshot` with the one before it and fill the report fields.
    ///
    /// A failed reference read is recorded in `summary.error` and returned.
    async fn report(&self, summary: &mut CycleSummary, snapshot: &Snapshot) -> Result<(), StorageError> {
        let _timer = LatencyTimer::new("compare");
        summary.capture_date = Some(snapshot.capture_date());
        summary.provenance = Some(snapshot.provenance());
        summary.zero_stock_active = snapshot.zero_stock_active().len();
        summary.cached_records = snapshot.cached_record_count();
        summary.missing_locations = snapshot.missing_locations().to_vec();

        let reference = match self.store.find_latest_before(snapshot.capture_date()).await {
            Ok(reference) => reference,
            Err(e) => {
                self.store_failed("find_latest_before", &e);
                summary.error = Some(e.to_string());
                return Err(e);
            }
        };

        match ChangeDetector::compare_to(snapshot, reference.as_ref()) {
            Comparison::NoPriorData => {
                debug!("No prior snapshot, nothing to compare");
                summary.no_prior_data = true;
            }
            Comparison::Changes(changes) => {
                let threshold = self.settings.highlight_threshold;
                summary.reference_date = Some(changes.reference_date);
                summary.counts = changes.counts(threshold);
                summary.highlights = changes.significant(threshold).cloned().collect();
                crate::metrics::record_changes(&summary.counts);
            }
        }
        Ok(())
    }

    /// Store a freshly fetched snapshot.
    ///
    /// A daily write never replaces a stored snapshot: finding one already
    /// stored for the date is a data-integrity error.
    async fn persist(
        &self,
        summary: &mut CycleSummary,
        snapshot: &Snapshot,
        trigger: CycleTrigger,
    ) -> Result<(), StorageError> {
        let _timer = LatencyTimer::new("store");
        let mode = match trigger {
            CycleTrigger::Daily => WriteMode::Reject,
            CycleTrigger::Manual | CycleTrigger::Resync => WriteMode::Replace,
        };

        match self.store.put(snapshot, mode).await {
            Ok(()) => {
                crate::metrics::record_snapshot_stored(snapshot.provenance().as_str());
                self.events.emit(TrackerEvent::SnapshotStored {
                    date: snapshot.capture_date(),
                    records: snapshot.records().len(),
                });
                Ok(())
            }
            Err(e) => {
                self.store_failed("put", &e);
                summary.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Drop history past the retention window. Only after a fully successful cycle.
    async fn purge(&self) {
        let _timer = LatencyTimer::new("purge");
        let today = self.clock.today();
        match self.store.purge_older_than(self.settings.retention_days, today).await {
            Ok(report) => {
                if let Some(cutoff) = report.cutoff {
                    crate::metrics::record_purge(report.snapshots_deleted, report.records_deleted);
                    self.events.emit(TrackerEvent::Purged {
                        cutoff,
                        snapshots: report.snapshots_deleted,
                        records: report.records_deleted,
                    });
                }
            }
            // The snapshot is stored; expired history waits for the next purge.
            Err(e) => self.store_failed("purge", &e),
        }
    }

    fn store_failed(&self, operation: &'static str, error: &StorageError) {
        crate::metrics::record_store_error(operation);
        self.events.emit(TrackerEvent::StoreFailed {
            operation,
            error: error.to_string(),
        });
    }

    fn record_attempt(&self, attempt: PollAttempt) {
        let mut log = self.attempts.lock();
        while log.len() >= self.settings.attempt_log_len.max(1) {
            log.pop_front();
        }
        log.push_back(attempt);
    }

    pub(super) fn set_state(&self, state: CycleState) {
        crate::metrics::set_cycle_state(state.metric_code());
        self.state.send_replace(state);
    }
}
