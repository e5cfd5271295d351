//! Cooperative cancellation for waits.
//!
//! Only the points where a cycle idles (retry delays, trigger timers) listen
//! for shutdown. Queries and store writes run to completion or time out.

use std::time::Duration;

use tokio::sync::watch;

/// Sending side: flips every [`Shutdown`] listener to cancelled.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    #[must_use]
    pub fn listener(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }

    pub fn trigger(&self) {
        let _ = self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for ShutdownTrigger {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side, cheap to clone.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// How a cancellable wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Elapsed,
    Cancelled,
}

impl Shutdown {
    /// A listener that is never triggered.
    #[must_use]
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been triggered.
    pub async fn triggered(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Trigger dropped without firing: nobody can cancel any more.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleep for `delay` unless shutdown fires first.
    pub async fn sleep(&mut self, delay: Duration) -> Wait {
        if self.is_triggered() {
            return Wait::Cancelled;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => Wait::Elapsed,
            _ = self.triggered() => Wait::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_elapses() {
        let trigger = ShutdownTrigger::new();
        let mut shutdown = trigger.listener();
        assert_eq!(shutdown.sleep(Duration::from_secs(60)).await, Wait::Elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_interrupts_sleep() {
        let trigger = ShutdownTrigger::new();
        let mut shutdown = trigger.listener();

        let waiter = tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let result = shutdown.sleep(Duration::from_secs(3600)).await;
            (result, started.elapsed())
        });
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.trigger();

        let (result, waited) = waiter.await.unwrap();
        assert_eq!(result, Wait::Cancelled);
        assert!(waited < Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_triggered_returns_immediately() {
        let trigger = ShutdownTrigger::new();
        trigger.trigger();
        let mut shutdown = trigger.listener();
        assert!(shutdown.is_triggered());
        assert_eq!(shutdown.sleep(Duration::from_secs(60)).await, Wait::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_is_never_cancelled() {
        let mut shutdown = Shutdown::never();
        assert_eq!(shutdown.sleep(Duration::from_secs(1)).await, Wait::Elapsed);
    }
}
