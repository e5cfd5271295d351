// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change detection between two snapshots.
//!
//! Comparison is pure: it looks only at the two snapshots it is given. Every
//! (article, location) pair present in either snapshot yields exactly one
//! quantity event, and every article whose status flipped yields one status
//! event (with no location). Events are ordered most significant first.
//!
//! # Example
//!
//! ```
//! use inventory_tracker::detector::{ChangeDetector, Classification};
//! use inventory_tracker::inventory::{Article, ArticleStatus, Provenance, Snapshot, StockRecord};
//! use chrono::NaiveDate;
//!
//! let (d1, d2) = (NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(), NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
//! let snap = |d, qty| Snapshot::builder(d, Provenance::Live)
//!     .article(Article::new("A0005", "Schraube M4", ArticleStatus::Active))
//!     .record(StockRecord::live("A0005", "Hauptlager", qty, d))
//!     .build()
//!     .unwrap();
//!
//! let changes = ChangeDetector::compare(&snap(d2, 0), &snap(d1, 2));
//! let event = &changes.events()[0];
//! assert_eq!(event.classification, Classification::Zeroed);
//! assert_eq!(event.percent.value(), Some(-100.0));
//! ```

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

use crate::inventory::{ArticleId, ArticleStatus, LocationId, Snapshot};

/// What happened to one pair (or, for status events, one article).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Increase,
    Decrease,
    /// Went from positive stock to zero
    Zeroed,
    /// Present in the reference, absent now
    Removed,
    Deactivated,
    Reactivated,
    Unchanged,
}

impl Classification {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Increase => "increase",
            Self::Decrease => "decrease",
            Self::Zeroed => "zeroed",
            Self::Removed => "removed",
            Self::Deactivated => "deactivated",
            Self::Reactivated => "reactivated",
            Self::Unchanged => "unchanged",
        }
    }

    #[must_use]
    pub fn is_status_change(&self) -> bool {
        matches!(self, Self::Deactivated | Self::Reactivated)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relative change against the reference quantity.
///
/// Growth from zero has no finite percentage and is kept distinct.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PercentDelta {
    Finite(f64),
    /// Reference quantity was 0, current is positive
    Infinite,
}

impl PercentDelta {
    /// `(current - previous) / previous × 100`, with 0 → 0 as 0%.
    #[must_use]
    pub fn between(previous: u64, current: u64) -> Self {
        if previous == 0 {
            return if current == 0 {
                Self::Finite(0.0)
            } else {
                Self::Infinite
            };
        }
        let delta = current as f64 - previous as f64;
        Self::Finite(delta / previous as f64 * 100.0)
    }

    #[must_use]
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Finite(v) => Some(*v),
            Self::Infinite => None,
        }
    }

    /// Absolute size used for ordering; infinite sorts above everything.
    #[must_use]
    pub fn magnitude(&self) -> f64 {
        match self {
            Self::Finite(v) => v.abs(),
            Self::Infinite => f64::INFINITY,
        }
    }
}

impl fmt::Display for PercentDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finite(v) => write!(f, "{:+.1}%", v),
            Self::Infinite => f.write_str("new"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub article: ArticleId,
    /// `None` for status events, which concern the article as a whole
    pub location: Option<LocationId>,
    /// `None` when the pair did not exist in the reference
    pub previous_quantity: Option<u64>,
    /// `None` when the pair no longer exists
    pub current_quantity: Option<u64>,
    pub delta: i64,
    pub percent: PercentDelta,
    pub classification: Classification,
}

impl ChangeEvent {
    #[must_use]
    pub fn is_change(&self) -> bool {
        self.classification != Classification::Unchanged
    }
}

/// Counts by classification, for summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeCounts {
    pub increased: usize,
    pub decreased: usize,
    pub zeroed: usize,
    pub removed: usize,
    pub deactivated: usize,
    pub reactivated: usize,
    pub unchanged: usize,
    /// Changed quantity events at or above the highlight threshold
    pub significant: usize,
}

impl ChangeCounts {
    /// Quantity events that are not `Unchanged`.
    #[must_use]
    pub fn changed(&self) -> usize {
        self.increased + self.decreased + self.zeroed + self.removed
    }
}

/// Ordered result of one comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeSet {
    pub current_date: NaiveDate,
    pub reference_date: NaiveDate,
    events: Vec<ChangeEvent>,
}

impl ChangeSet {
    /// All events, most significant first.
    #[must_use]
    pub fn events(&self) -> &[ChangeEvent] {
        &self.events
    }

    /// Events that are not `Unchanged`.
    pub fn changes(&self) -> impl Iterator<Item = &ChangeEvent> {
        self.events.iter().filter(|e| e.is_change())
    }

    /// Changed events whose |percent| reaches `threshold` (infinite always does).
    pub fn significant(&self, threshold: f64) -> impl Iterator<Item = &ChangeEvent> {
        self.changes().filter(move |e| e.percent.magnitude() >= threshold)
    }

    #[must_use]
    pub fn counts(&self, threshold: f64) -> ChangeCounts {
        let mut counts = ChangeCounts::default();
        for event in &self.events {
            match event.classification {
                Classification::Increase => counts.increased += 1,
                Classification::Decrease => counts.decreased += 1,
                Classification::Zeroed => counts.zeroed += 1,
                Classification::Removed => counts.removed += 1,
                Classification::Deactivated => counts.deactivated += 1,
                Classification::Reactivated => counts.reactivated += 1,
                Classification::Unchanged => counts.unchanged += 1,
            }
        }
        counts.significant = self.significant(threshold).count();
        counts
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }
}

/// Result of comparing against whatever reference is available.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    /// First run: nothing to compare against. Not an error.
    NoPriorData,
    Changes(ChangeSet),
}

impl Comparison {
    #[must_use]
    pub fn change_set(&self) -> Option<&ChangeSet> {
        match self {
            Self::NoPriorData => None,
            Self::Changes(set) => Some(set),
        }
    }
}

pub struct ChangeDetector;

impl ChangeDetector {
    /// Compare `current` against `reference`.
    #[must_use]
    pub fn compare(current: &Snapshot, reference: &Snapshot) -> ChangeSet {
        let cur = current.record_map();
        let prev = reference.record_map();
        let keys: BTreeSet<_> = cur.keys().chain(prev.keys()).copied().collect();

        let mut events = Vec::with_capacity(keys.len());
        for key in keys {
            let (article, location) = key;
            let previous = prev.get(&key).map(|r| r.quantity);
            let current = cur.get(&key).map(|r| r.quantity);
            events.push(quantity_event(article, location, previous, current));
        }

        for (id, article) in current.articles() {
            let Some(before) = reference.article(id) else {
                continue;
            };
            let classification = match (before.status, article.status) {
                (ArticleStatus::Active, ArticleStatus::Inactive) => Classification::Deactivated,
                (ArticleStatus::Inactive, ArticleStatus::Active) => Classification::Reactivated,
                _ => continue,
            };
            let previous = reference.total_quantity(id);
            let now = current.total_quantity(id);
            events.push(ChangeEvent {
                article: id.clone(),
                location: None,
                previous_quantity: Some(previous),
                current_quantity: Some(now),
                delta: signed_delta(previous, now),
                percent: PercentDelta::between(previous, now),
                classification,
            });
        }

        events.sort_by(significance_order);

        ChangeSet {
            current_date: current.capture_date(),
            reference_date: reference.capture_date(),
            events,
        }
    }

    /// Compare against an optional reference; `None` is a first run.
    #[must_use]
    pub fn compare_to(current: &Snapshot, reference: Option<&Snapshot>) -> Comparison {
        match reference {
            Some(reference) => Comparison::Changes(Self::compare(current, reference)),
            None => Comparison::NoPriorData,
        }
    }
}

fn quantity_event(
    article: &ArticleId,
    location: &LocationId,
    previous: Option<u64>,
    current: Option<u64>,
) -> ChangeEvent {
    let before = previous.unwrap_or(0);
    let now = current.unwrap_or(0);

    let (classification, percent) = match (previous, current) {
        (Some(p), None) => (
            Classification::Removed,
            if p == 0 {
                PercentDelta::Finite(0.0)
            } else {
                PercentDelta::Finite(-100.0)
            },
        ),
        _ if now == before => (Classification::Unchanged, PercentDelta::between(before, now)),
        _ if now == 0 => (Classification::Zeroed, PercentDelta::between(before, now)),
        _ if now > before => (Classification::Increase, PercentDelta::between(before, now)),
        _ => (Classification::Decrease, PercentDelta::between(before, now)),
    };

    ChangeEvent {
        article: article.clone(),
        location: Some(location.clone()),
        previous_quantity: previous,
        current_quantity: current,
        delta: signed_delta(before, now),
        percent,
        classification,
    }
}

fn signed_delta(previous: u64, current: u64) -> i64 {
    let diff = i128::from(current) - i128::from(previous);
    i64::try_from(diff).unwrap_or(if diff > 0 { i64::MAX } else { i64::MIN })
}

/// |percent| descending, then article, location and classification ascending.
fn significance_order(a: &ChangeEvent, b: &ChangeEvent) -> Ordering {
    b.percent
        .magnitude()
        .total_cmp(&a.percent.magnitude())
        .then_with(|| a.article.cmp(&b.article))
        .then_with(|| a.location.cmp(&b.location))
        .then_with(|| a.classification.cmp(&b.classification))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{Article, Provenance, StockRecord};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    struct Snap {
        date: NaiveDate,
        articles: Vec<(&'static str, ArticleStatus)>,
        records: Vec<(&'static str, &'static str, u64)>,
    }

    impl Snap {
        fn build(self) -> Snapshot {
            let mut builder = Snapshot::builder(self.date, Provenance::Live);
            for (id, status) in self.articles {
                builder = builder.article(Article::new(id, id, status));
            }
            for (article, location, qty) in self.records {
                builder = builder.record(StockRecord::live(article, location, qty, self.date));
            }
            builder.build().unwrap()
        }
    }

    fn active(ids: &[&'static str]) -> Vec<(&'static str, ArticleStatus)> {
        ids.iter().map(|id| (*id, ArticleStatus::Active)).collect()
    }

    fn event<'a>(set: &'a ChangeSet, article: &str, location: Option<&str>) -> &'a ChangeEvent {
        set.events()
            .iter()
            .find(|e| e.article.as_str() == article && e.location.as_ref().map(LocationId::as_str) == location)
            .unwrap()
    }

    #[test]
    fn test_zeroed_stock() {
        let prev = Snap { date: day(1), articles: active(&["A0005"]), records: vec![("A0005", "Hauptlager", 2)] }.build();
        let cur = Snap { date: day(2), articles: active(&["A0005"]), records: vec![("A0005", "Hauptlager", 0)] }.build();

        let set = ChangeDetector::compare(&cur, &prev);
        let e = event(&set, "A0005", Some("Hauptlager"));
        assert_eq!(e.classification, Classification::Zeroed);
        assert_eq!(e.delta, -2);
        assert_eq!(e.percent, PercentDelta::Finite(-100.0));
        assert_eq!(set.counts(10.0).zeroed, 1);
    }

    #[test]
    fn test_growth_from_zero_is_infinite_increase() {
        let prev = Snap { date: day(1), articles: active(&["A0001"]), records: vec![("A0001", "L1", 0)] }.build();
        let cur = Snap { date: day(2), articles: active(&["A0001"]), records: vec![("A0001", "L1", 5)] }.build();

        let set = ChangeDetector::compare(&cur, &prev);
        let e = event(&set, "A0001", Some("L1"));
        assert_eq!(e.classification, Classification::Increase);
        assert_eq!(e.percent, PercentDelta::Infinite);
        assert_eq!(e.percent.to_string(), "new");
    }

    #[test]
    fn test_new_and_removed_pairs() {
        let prev = Snap { date: day(1), articles: active(&["A0001"]), records: vec![("A0001", "L1", 4)] }.build();
        let cur = Snap { date: day(2), articles: active(&["A0001"]), records: vec![("A0001", "L2", 3)] }.build();

        let set = ChangeDetector::compare(&cur, &prev);
        assert_eq!(set.len(), 2);

        let removed = event(&set, "A0001", Some("L1"));
        assert_eq!(removed.classification, Classification::Removed);
        assert_eq!(removed.current_quantity, None);
        assert_eq!(removed.delta, -4);

        let added = event(&set, "A0001", Some("L2"));
        assert_eq!(added.classification, Classification::Increase);
        assert_eq!(added.previous_quantity, None);
        assert_eq!(added.percent, PercentDelta::Infinite);
    }

    #[test]
    fn test_status_flip_is_separate_event() {
        let prev = Snap {
            date: day(1),
            articles: vec![("A0001", ArticleStatus::Active), ("A0002", ArticleStatus::Inactive)],
            records: vec![("A0001", "L1", 3), ("A0002", "L1", 1)],
        }
        .build();
        let cur = Snap {
            date: day(2),
            articles: vec![("A0001", ArticleStatus::Inactive), ("A0002", ArticleStatus::Active)],
            records: vec![("A0001", "L1", 3), ("A0002", "L1", 1)],
        }
        .build();

        let set = ChangeDetector::compare(&cur, &prev);
        assert_eq!(event(&set, "A0001", None).classification, Classification::Deactivated);
        assert_eq!(event(&set, "A0002", None).classification, Classification::Reactivated);
        assert_eq!(event(&set, "A0001", Some("L1")).classification, Classification::Unchanged);

        let counts = set.counts(10.0);
        assert_eq!(counts.deactivated, 1);
        assert_eq!(counts.reactivated, 1);
        assert_eq!(counts.changed(), 0);
    }

    #[test]
    fn test_ordering_by_magnitude_then_article() {
        let prev = Snap {
            date: day(1),
            articles: active(&["A", "B", "C", "D"]),
            records: vec![("A", "L", 100), ("B", "L", 100), ("C", "L", 0), ("D", "L", 100)],
        }
        .build();
        let cur = Snap {
            date: day(2),
            articles: active(&["A", "B", "C", "D"]),
            records: vec![("A", "L", 110), ("B", "L", 50), ("C", "L", 1), ("D", "L", 90)],
        }
        .build();

        let set = ChangeDetector::compare(&cur, &prev);
        let order: Vec<&str> = set.events().iter().map(|e| e.article.as_str()).collect();
        // C: new, B: -50%, A and D: 10% (tie broken by article)
        assert_eq!(order, vec!["C", "B", "A", "D"]);
    }

    #[test]
    fn test_significant_respects_threshold() {
        let prev = Snap { date: day(1), articles: active(&["A", "B"]), records: vec![("A", "L", 100), ("B", "L", 100)] }.build();
        let cur = Snap { date: day(2), articles: active(&["A", "B"]), records: vec![("A", "L", 105), ("B", "L", 80)] }.build();

        let set = ChangeDetector::compare(&cur, &prev);
        let significant: Vec<&str> = set.significant(10.0).map(|e| e.article.as_str()).collect();
        assert_eq!(significant, vec!["B"]);
        assert_eq!(set.counts(10.0).significant, 1);
    }

    #[test]
    fn test_self_comparison_has_no_changes() {
        let snap = Snap { date: day(1), articles: active(&["A", "B"]), records: vec![("A", "L", 3), ("B", "M", 0)] }.build();

        let set = ChangeDetector::compare(&snap, &snap);
        assert_eq!(set.len(), 2);
        assert_eq!(set.changes().count(), 0);
    }

    #[test]
    fn test_no_reference_is_first_run() {
        let snap = Snap { date: day(1), articles: active(&["A"]), records: vec![("A", "L", 3)] }.build();
        assert_eq!(ChangeDetector::compare_to(&snap, None), Comparison::NoPriorData);
        assert!(ChangeDetector::compare_to(&snap, Some(&snap)).change_set().is_some());
    }
}
