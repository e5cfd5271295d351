// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry-then-replay around a source fetch.
//!
//! ```text
//! attempt 1 ── transient ──▶ wait ──▶ attempt 2 ── ... ──▶ attempt N ── transient ──┐
//!    │                                                                               ▼
//!    ├─ ok, complete ───────▶ Live                                replay latest stored snapshot
//!    ├─ ok, partial ────────▶ Live (gaps filled from cache)          ├─ found ──▶ Replayed
//!    └─ permanent ──────────▶ Failed (no retries)                    └─ none ───▶ Failed
//! ```
//!
//! Shutdown during a wait ends the retry loop early and goes straight to replay.

use std::future::Future;
use std::sync::Arc;

use chrono::NaiveDate;
use thiserror::Error;

use super::retry::RetryPolicy;
use super::shutdown::{Shutdown, Wait};
use crate::clock::Clock;
use crate::events::{EventSink, TrackerEvent};
use crate::gateway::{FetchedInventory, GatewayError};
use crate::inventory::{Snapshot, SnapshotError};
use crate::storage::traits::{SnapshotStore, StorageError};

#[derive(Error, Debug)]
pub enum FallbackError {
    #[error("Source failed permanently: {0}")]
    Permanent(#[source] GatewayError),
    #[error("Source unavailable after {attempts} attempts and no cached snapshot to replay (last error: {last})")]
    Exhausted { attempts: u32, last: GatewayError },
    #[error("Fetch succeeded but could not be merged with cached data: {0}")]
    Merge(#[source] SnapshotError),
    #[error("Snapshot store unavailable for replay: {0}")]
    Storage(#[source] StorageError),
}

/// How old replayed data is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Staleness {
    pub captured_on: NaiveDate,
    /// Whole days between `captured_on` and the cycle date
    pub age_days: i64,
}

#[derive(Debug)]
pub enum Outcome {
    /// Fresh data. Provenance is `Live`, or `Partial` when gaps were filled from cache.
    Live { snapshot: Snapshot, attempts: u32 },
    /// Stored data served because the source stayed unreachable
    Replayed {
        snapshot: Snapshot,
        staleness: Staleness,
        attempts: u32,
        cause: GatewayError,
    },
    Failed { error: FallbackError, attempts: u32 },
}

impl Outcome {
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Live { attempts, .. } | Self::Replayed { attempts, .. } | Self::Failed { attempts, .. } => {
                *attempts
            }
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            Self::Live { snapshot, .. } | Self::Replayed { snapshot, .. } => Some(snapshot),
            Self::Failed { .. } => None,
        }
    }
}

pub struct FallbackCoordinator {
    store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl FallbackCoordinator {
    pub fn new(store: Arc<dyn SnapshotStore>, clock: Arc<dyn Clock>, events: Arc<dyn EventSink>) -> Self {
        Self { store, clock, events }
    }

    /// Run `operation` under `policy`, falling back to the store when it keeps failing.
    ///
    /// Transient errors are retried until `policy.max_attempts` queries have
    /// been issued. Permanent errors and pool exhaustion are not retried.
    pub async fn execute<F, Fut>(&self, mut operation: F, policy: &RetryPolicy, shutdown: &mut Shutdown) -> Outcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<FetchedInventory, GatewayError>>,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0u32;

        let last = loop {
            attempt += 1;
            match operation().await {
                Ok(fetched) if fetched.is_complete() => {
                    return Outcome::Live {
                        snapshot: fetched.snapshot,
                        attempts: attempt,
                    };
                }
                Ok(fetched) => return self.fill_partial(fetched, attempt).await,
                Err(e) if !e.is_retryable() => {
                    crate::metrics::record_fetch_error(e.label());
                    self.events.emit(TrackerEvent::AttemptFailed {
                        attempt,
                        max_attempts,
                        error: e.to_string(),
                        retry_in: None,
                    });
                    return Outcome::Failed {
                        error: FallbackError::Permanent(e),
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    crate::metrics::record_fetch_error(e.label());
                    let retry_in = (attempt < max_attempts).then(|| policy.delay_after(attempt));
                    self.events.emit(TrackerEvent::AttemptFailed {
                        attempt,
                        max_attempts,
                        error: e.to_string(),
                        retry_in,
                    });
                    let Some(delay) = retry_in else {
                        break e;
                    };
                    crate::metrics::record_retry();
                    if shutdown.sleep(delay).await == Wait::Cancelled {
                        self.events.emit(TrackerEvent::RetryCancelled { attempt });
                        break e;
                    }
                }
            }
        };

        self.replay(last, attempt).await
    }

    async fn fill_partial(&self, fetched: FetchedInventory, attempts: u32) -> Outcome {
        let unreachable = fetched.unreachable_ids();
        let today = fetched.snapshot.capture_date();

        // Gaps are still better than no data: a store failure leaves them unfilled.
        let cached = match self.store.find_latest_before(today).await {
            Ok(cached) => cached,
            Err(e) => {
                self.events.emit(TrackerEvent::StoreFailed {
                    operation: "find_latest_before",
                    error: e.to_string(),
                });
                None
            }
        };

        self.events.emit(TrackerEvent::PartialFetch {
            unreachable: unreachable.clone(),
            filled_from: cached.as_ref().map(Snapshot::capture_date),
        });

        match fetched.snapshot.fill_from_cache(&unreachable, cached.as_ref()) {
            Ok(snapshot) => Outcome::Live { snapshot, attempts },
            Err(e) => Outcome::Failed {
                error: FallbackError::Merge(e),
                attempts,
            },
        }
    }

    async fn replay(&self, last: GatewayError, attempts: u32) -> Outcome {
        let today = self.clock.today();
        crate::metrics::record_fallback();

        // Anything stored up to and including today counts as prior data.
        let lookup = today.succ_opt().unwrap_or(today);
        match self.store.find_latest_before(lookup).await {
            Ok(Some(stored)) => {
                let staleness = Staleness {
                    captured_on: stored.capture_date(),
                    age_days: (today - stored.capture_date()).num_days(),
                };
                self.events.emit(TrackerEvent::FallbackEngaged {
                    attempts,
                    replay_date: Some(staleness.captured_on),
                    staleness_days: Some(staleness.age_days),
                });
                Outcome::Replayed {
                    snapshot: stored.into_replayed(),
                    staleness,
                    attempts,
                    cause: last,
                }
            }
            Ok(None) => {
                self.events.emit(TrackerEvent::FallbackEngaged {
                    attempts,
                    replay_date: None,
                    staleness_days: None,
                });
                Outcome::Failed {
                    error: FallbackError::Exhausted { attempts, last },
                    attempts,
                }
            }
            Err(e) => {
                self.events.emit(TrackerEvent::StoreFailed {
                    operation: "find_latest_before",
                    error: e.to_string(),
                });
                Outcome::Failed {
                    error: FallbackError::Storage(e),
                    attempts,
                }
            }
        }
    }
}
