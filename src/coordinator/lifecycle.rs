//! Scheduler lifecycle: daily trigger, resync after degraded cycles, stop.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{NaiveDateTime, NaiveTime};
use tracing::{debug, info};

use super::{CycleTrigger, Inner, Scheduler, SchedulerError};
use crate::clock::until_next;
use crate::events::TrackerEvent;
use crate::resilience::shutdown::{ShutdownTrigger, Wait};

impl Scheduler {
    /// Poll every day at `at` (local time of the scheduler's clock).
    ///
    /// Replaces any previously registered daily trigger. A cycle already in
    /// flight is not interrupted.
    pub fn schedule_daily(&self, at: NaiveTime) {
        if self.is_stopped() {
            return;
        }

        let cancel = ShutdownTrigger::new();
        let mut replaced = cancel.listener();
        let mut shutdown = self.inner.shutdown.listener();
        let inner = self.inner.clone();

        let handle = tokio::spawn(async move {
            let mut last_target: Option<NaiveDateTime> = None;
            loop {
                let now = inner.clock.now();
                // Never fire twice for the same slot, even if the clock lags behind.
                let from = last_target.map_or(now, |t| t.max(now));
                let target = from + chrono::Duration::from_std(until_next(from, at)).unwrap_or(chrono::Duration::zero());
                let delay = (target - now).to_std().unwrap_or_default();
                debug!(%target, "Next daily poll scheduled");

                tokio::select! {
                    _ = replaced.triggered() => break,
                    wait = shutdown.sleep(delay) => {
                        if wait == Wait::Cancelled {
                            break;
                        }
                    }
                }
                last_target = Some(target);

                if let Err(SchedulerError::Stopped) = inner.run_exclusive(CycleTrigger::Daily).await {
                    break;
                }
            }
        });

        info!(at = %at, "Daily poll registered");
        if let Some((old, _handle)) = self.inner.daily.lock().replace((cancel, handle)) {
            old.trigger();
        }
    }

    /// Remove the daily trigger. Returns false if none was registered.
    pub fn cancel_daily(&self) -> bool {
        match self.inner.daily.lock().take() {
            Some((cancel, _handle)) => {
                cancel.trigger();
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Cancel all pending triggers and wait for an in-flight cycle to finish.
    ///
    /// A cycle waiting between retries stops waiting and completes from cache.
    /// Queries and store writes in progress run to completion.
    pub async fn stop(&self) {
        let stop_start = std::time::Instant::now();
        info!("Stopping scheduler...");
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.shutdown.trigger();

        let daily = self.inner.daily.lock().take();
        let resync = self.inner.resync.lock().take();
        for (cancel, handle) in daily.into_iter().chain(resync) {
            cancel.trigger();
            let _ = handle.await;
        }

        // A manual run_now may still hold the cycle.
        let _cycle = self.inner.cycle_lock.lock().await;

        info!(elapsed_ms = stop_start.elapsed().as_millis() as u64, "Scheduler stopped");
    }
}

impl Inner {
    /// Re-poll after a degraded cycle, up to `max_resyncs` times in a row.
    pub(super) fn schedule_resync(self: &Arc<Self>) {
        let Some(after) = self.settings.resync_after else {
            return;
        };
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let resync = self.resyncs.fetch_add(1, Ordering::SeqCst) + 1;
        if resync > self.settings.max_resyncs {
            debug!(max = self.settings.max_resyncs, "Resync limit reached, waiting for next trigger");
            return;
        }

        let cancel = ShutdownTrigger::new();
        let mut replaced = cancel.listener();
        let mut shutdown = self.shutdown.listener();
        let inner = self.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = replaced.triggered() => {}
                wait = shutdown.sleep(after) => {
                    if wait == Wait::Elapsed {
                        let _ = inner.run_exclusive(CycleTrigger::Resync).await;
                    }
                }
            }
        });

        self.events.emit(TrackerEvent::ResyncScheduled { after, resync });
        // The replaced task may be the one calling us; it is only told to stop waiting.
        if let Some((old, _handle)) = self.resync.lock().replace((cancel, handle)) {
            old.trigger();
        }
    }
}
