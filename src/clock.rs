// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Wall-clock source.
//!
//! Everything that needs "today" (capture dates, staleness, retention cutoff,
//! next daily trigger) asks a [`Clock`] instead of calling `Local::now()`, so
//! tests can pin the date. Delays themselves go through `tokio::time`, which
//! tests control with a paused runtime.

use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    /// Current local date and time.
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// Local system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self { now: Mutex::new(now) }
    }

    /// Start at midnight of `date`.
    pub fn at_date(date: NaiveDate) -> Self {
        Self::new(date.and_time(NaiveTime::MIN))
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        if let Ok(delta) = chrono::Duration::from_std(by) {
            *now += delta;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock()
    }
}

/// Time until the next occurrence of `at`, strictly after `now`.
///
/// If `now` is exactly `at`, the next occurrence is tomorrow.
pub fn until_next(now: NaiveDateTime, at: NaiveTime) -> Duration {
    let today = now.date().and_time(at);
    let next = if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    };
    (next - now).to_std().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 5, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_until_next_later_today() {
        let at = NaiveTime::from_hms_opt(23, 0, 0).unwrap();
        assert_eq!(until_next(dt(4, 22, 30), at), Duration::from_secs(30 * 60));
    }

    #[test]
    fn test_until_next_rolls_to_tomorrow() {
        let at = NaiveTime::from_hms_opt(6, 0, 0).unwrap();
        assert_eq!(until_next(dt(4, 7, 0), at), Duration::from_secs(23 * 3600));
    }

    #[test]
    fn test_until_next_exact_time_is_tomorrow() {
        let at = NaiveTime::from_hms_opt(23, 0, 0).unwrap();
        assert_eq!(until_next(dt(4, 23, 0), at), Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(dt(4, 23, 30));
        clock.advance(Duration::from_secs(3600));
        assert_eq!(clock.now(), dt(5, 0, 30));
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2026, 5, 5).unwrap());
    }
}
