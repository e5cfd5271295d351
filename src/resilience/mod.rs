//! Retry, fallback and cancellation.

pub mod retry;
pub mod shutdown;
pub mod fallback;
