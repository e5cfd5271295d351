//! Public types for the tracker scheduler.

use chrono::NaiveDateTime;
use serde::Serialize;

/// Scheduler state, broadcast on every transition.
///
/// Use [`super::Scheduler::state()`] to check the current state or
/// [`super::Scheduler::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    /// No cycle has run yet
    Idle,
    /// A cycle is in progress
    Running,
    /// Last cycle stored a live snapshot and reported changes
    Succeeded,
    /// Last cycle completed on cached or partial data
    Degraded,
    /// Last cycle produced nothing to report
    Failed,
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Running => write!(f, "Running"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// What started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleTrigger {
    /// The daily time-of-day timer
    Daily,
    /// An explicit `run_now`
    Manual,
    /// Follow-up after a degraded cycle
    Resync,
}

impl std::fmt::Display for CycleTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daily => write!(f, "daily"),
            Self::Manual => write!(f, "manual"),
            Self::Resync => write!(f, "resync"),
        }
    }
}

/// How one poll attempt ended, from the scheduler's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollOutcome {
    /// Live data obtained (possibly after retries)
    Success,
    /// Live data obtained for only some locations
    TransientFailure,
    /// Retries ran out; cached data (or nothing) was used
    Exhausted,
    /// Retrying would not help; no fetch was retried
    PermanentFailure,
}

/// One scheduler invocation, kept in a bounded log for inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollAttempt {
    pub cycle_id: String,
    pub trigger: CycleTrigger,
    pub started_at: NaiveDateTime,
    /// Source queries issued, including the first
    pub attempts: u32,
    pub outcome: PollOutcome,
    pub state: CycleState,
}
