//! Property-based tests for snapshot comparison.
//!
//! Generates random pairs of snapshots and checks the comparison invariants
//! hold for all of them.
//!
//! Run with: `cargo test --test proptest_detector`

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use proptest::prelude::*;

use inventory_tracker::{
    Article, ArticleStatus, ChangeDetector, Classification, PercentDelta, Provenance, Snapshot, StockRecord,
};

// =============================================================================
// Strategies
// =============================================================================

type Stock = BTreeMap<(u8, u8), u64>;

/// Up to 6 articles across 3 locations, quantities including zero
fn stock_strategy() -> impl Strategy<Value = Stock> {
    prop::collection::btree_map((0u8..6, 0u8..3), 0u64..500, 0..18)
}

fn statuses_strategy() -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(any::<bool>(), 6)
}

fn snapshot(date: NaiveDate, stock: &Stock, active: &[bool]) -> Snapshot {
    let mut builder = Snapshot::builder(date, Provenance::Live);
    for (i, is_active) in active.iter().enumerate() {
        let status = if *is_active { ArticleStatus::Active } else { ArticleStatus::Inactive };
        builder = builder.article(Article::new(format!("A{:04}", i), format!("Artikel {}", i), status));
    }
    for ((article, location), qty) in stock {
        builder = builder.record(StockRecord::live(
            format!("A{:04}", article),
            format!("L{}", location),
            *qty,
            date,
        ));
    }
    builder.build().unwrap()
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn self_comparison_is_all_unchanged(stock in stock_strategy(), active in statuses_strategy()) {
        let snap = snapshot(day(1), &stock, &active);
        let set = ChangeDetector::compare(&snap, &snap);

        prop_assert_eq!(set.len(), stock.len());
        prop_assert_eq!(set.changes().count(), 0);
        for event in set.events() {
            prop_assert_eq!(event.delta, 0);
        }
    }

    #[test]
    fn every_pair_is_reported_once(
        before in stock_strategy(),
        after in stock_strategy(),
        active in statuses_strategy(),
    ) {
        let prev = snapshot(day(1), &before, &active);
        let cur = snapshot(day(2), &after, &active);
        let set = ChangeDetector::compare(&cur, &prev);

        let expected: BTreeSet<_> = before.keys().chain(after.keys()).copied().collect();
        let reported: Vec<_> = set.events().iter().filter(|e| e.location.is_some()).collect();
        prop_assert_eq!(reported.len(), expected.len());

        let counts = set.counts(0.0);
        prop_assert_eq!(counts.changed() + counts.unchanged, expected.len());
    }

    #[test]
    fn swapping_sides_negates_deltas(
        before in stock_strategy(),
        after in stock_strategy(),
        active in statuses_strategy(),
    ) {
        let a = snapshot(day(1), &before, &active);
        let b = snapshot(day(2), &after, &active);
        let forward = ChangeDetector::compare(&b, &a);
        let backward = ChangeDetector::compare(&a, &b);

        let index = |set: &inventory_tracker::ChangeSet| -> BTreeMap<(String, String), i64> {
            set.events()
                .iter()
                .filter_map(|e| {
                    let location = e.location.as_ref()?;
                    // Removed pairs only exist on one side
                    e.current_quantity?;
                    e.previous_quantity?;
                    Some(((e.article.to_string(), location.to_string()), e.delta))
                })
                .collect()
        };

        let f = index(&forward);
        let r = index(&backward);
        prop_assert_eq!(f.len(), r.len());
        for (key, delta) in &f {
            prop_assert_eq!(r.get(key).copied(), Some(-delta));
        }
    }

    #[test]
    fn events_are_ordered_by_significance(before in stock_strategy(), after in stock_strategy()) {
        let active = vec![true; 6];
        let set = ChangeDetector::compare(&snapshot(day(2), &after, &active), &snapshot(day(1), &before, &active));

        for pair in set.events().windows(2) {
            prop_assert!(pair[0].percent.magnitude() >= pair[1].percent.magnitude());
        }
    }

    #[test]
    fn status_flips_are_reported_per_article(
        stock in stock_strategy(),
        was in statuses_strategy(),
        now in statuses_strategy(),
    ) {
        let set = ChangeDetector::compare(&snapshot(day(2), &stock, &now), &snapshot(day(1), &stock, &was));

        let flips = was.iter().zip(&now).filter(|(a, b)| a != b).count();
        let status_events: Vec<_> = set.events().iter().filter(|e| e.location.is_none()).collect();
        prop_assert_eq!(status_events.len(), flips);
        for event in status_events {
            prop_assert!(matches!(
                event.classification,
                Classification::Deactivated | Classification::Reactivated
            ));
            // Quantities did not move, only the status
            prop_assert_eq!(event.delta, 0);
        }
    }

    #[test]
    fn percent_from_zero_is_infinite_only_when_stock_appears(before in 0u64..50, after in 0u64..50) {
        let delta = PercentDelta::between(before, after);
        prop_assert_eq!(delta == PercentDelta::Infinite, before == 0 && after > 0);
    }
}
