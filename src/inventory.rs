// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Inventory data model.
//!
//! A [`Snapshot`] is the unit that flows through the tracker: every stock
//! record captured in one poll cycle, tagged with its capture date and where
//! the data came from ([`Provenance`]).
//!
//! # Example
//!
//! ```
//! use inventory_tracker::inventory::{Article, ArticleStatus, Provenance, Snapshot, StockRecord};
//! use chrono::NaiveDate;
//!
//! let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
//! let snapshot = Snapshot::builder(day, Provenance::Live)
//!     .article(Article::new("A0005", "Schraube M4", ArticleStatus::Active))
//!     .record(StockRecord::live("A0005", "Hauptlager", 2, day))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(snapshot.records().len(), 1);
//! assert_eq!(snapshot.total_quantity(&"A0005".into()), 2);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable external article code (the article number, not a surrogate key).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArticleId(String);

impl ArticleId {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ArticleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ArticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a stocking point. Stable across polls.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(String);

impl LocationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LocationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named stocking point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
}

/// Article lifecycle status as reported by the source database.
///
/// Only observed, never mutated, by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    Active,
    Inactive,
}

impl ArticleStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for ArticleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArticleStatus {
    type Err = SnapshotError;

    /// Accepts the English and German spellings used by source schemas
    /// (`active`/`aktiv`, `inactive`/`inaktiv`) and numeric flags.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" | "aktiv" | "a" | "1" | "true" => Ok(Self::Active),
            "inactive" | "inaktiv" | "i" | "0" | "false" => Ok(Self::Inactive),
            other => Err(SnapshotError::UnknownStatus(other.to_string())),
        }
    }
}

/// Descriptive attributes of an article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub status: ArticleStatus,
}

impl Article {
    pub fn new(id: impl Into<ArticleId>, name: impl Into<String>, status: ArticleStatus) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            manufacturer: None,
            category: None,
            status,
        }
    }

    #[must_use]
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

impl From<String> for ArticleId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<String> for LocationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Where a single stock record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordOrigin {
    /// Fetched from the source database in this cycle
    Live,
    /// Copied from the snapshot captured on `from` because the location was unreachable
    Cached { from: NaiveDate },
}

/// One stock observation. Immutable once captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub article: ArticleId,
    pub location: LocationId,
    pub quantity: u64,
    pub observed_on: NaiveDate,
    pub origin: RecordOrigin,
}

impl StockRecord {
    pub fn live(
        article: impl Into<ArticleId>,
        location: impl Into<LocationId>,
        quantity: u64,
        observed_on: NaiveDate,
    ) -> Self {
        Self {
            article: article.into(),
            location: location.into(),
            quantity,
            observed_on,
            origin: RecordOrigin::Live,
        }
    }

    /// Uniqueness key within a snapshot (the date is the snapshot's).
    #[must_use]
    pub fn key(&self) -> (ArticleId, LocationId) {
        (self.article.clone(), self.location.clone())
    }

    #[must_use]
    pub fn is_cached(&self) -> bool {
        matches!(self.origin, RecordOrigin::Cached { .. })
    }
}

/// How a snapshot was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Every location fetched live
    Live,
    /// Some locations fetched live, the rest filled from cache
    Partial,
    /// Whole snapshot served from the store after retries were exhausted
    Replayed,
}

impl Provenance {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Partial => "partial",
            Self::Replayed => "replayed",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provenance {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(Self::Live),
            "partial" => Ok(Self::Partial),
            "replayed" => Ok(Self::Replayed),
            other => Err(SnapshotError::UnknownProvenance(other.to_string())),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("duplicate stock record for article '{article}' at location '{location}'")]
    DuplicateRecord { article: ArticleId, location: LocationId },
    #[error("stock record for article '{0}' has no matching article entry")]
    UnknownArticle(ArticleId),
    #[error("stock record for '{article}' observed on {observed_on}, snapshot captured {capture_date}")]
    DateMismatch {
        article: ArticleId,
        observed_on: NaiveDate,
        capture_date: NaiveDate,
    },
    #[error("unknown article status '{0}'")]
    UnknownStatus(String),
    #[error("unknown snapshot provenance '{0}'")]
    UnknownProvenance(String),
}

/// An active article with nothing in stock, see [`Snapshot::zero_stock_active`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZeroStock<'a> {
    pub article: &'a ArticleId,
    /// `None` when the article has no stock row at any location
    pub location: Option<&'a LocationId>,
}

/// The complete set of stock records captured in a single poll cycle.
///
/// Invariants (checked by [`SnapshotBuilder::build`]):
/// - at most one record per (article, location)
/// - every record refers to an article listed in the snapshot
/// - live records are observed on the capture date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    capture_date: NaiveDate,
    captured_at: NaiveDateTime,
    provenance: Provenance,
    articles: BTreeMap<ArticleId, Article>,
    locations: BTreeMap<LocationId, Location>,
    /// Sorted by (article, location)
    records: Vec<StockRecord>,
    /// Locations that were unreachable and had no cached data to fill in
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    missing_locations: Vec<LocationId>,
}

impl Snapshot {
    pub fn builder(capture_date: NaiveDate, provenance: Provenance) -> SnapshotBuilder {
        SnapshotBuilder::new(capture_date, provenance)
    }

    #[must_use]
    pub fn capture_date(&self) -> NaiveDate {
        self.capture_date
    }

    #[must_use]
    pub fn captured_at(&self) -> NaiveDateTime {
        self.captured_at
    }

    #[must_use]
    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    #[must_use]
    pub fn articles(&self) -> &BTreeMap<ArticleId, Article> {
        &self.articles
    }

    #[must_use]
    pub fn article(&self, id: &ArticleId) -> Option<&Article> {
        self.articles.get(id)
    }

    #[must_use]
    pub fn locations(&self) -> &BTreeMap<LocationId, Location> {
        &self.locations
    }

    #[must_use]
    pub fn records(&self) -> &[StockRecord] {
        &self.records
    }

    #[must_use]
    pub fn missing_locations(&self) -> &[LocationId] {
        &self.missing_locations
    }

    /// Records keyed by (article, location) for pairwise comparison.
    #[must_use]
    pub fn record_map(&self) -> BTreeMap<(&ArticleId, &LocationId), &StockRecord> {
        self.records
            .iter()
            .map(|r| ((&r.article, &r.location), r))
            .collect()
    }

    /// Records observed at one location.
    pub fn records_at<'a>(&'a self, location: &'a LocationId) -> impl Iterator<Item = &'a StockRecord> + 'a {
        self.records.iter().filter(move |r| &r.location == location)
    }

    /// Sum of the article's stock across all locations.
    #[must_use]
    pub fn total_quantity(&self, article: &ArticleId) -> u64 {
        self.records
            .iter()
            .filter(|r| &r.article == article)
            .map(|r| r.quantity)
            .sum()
    }

    /// Number of records that were filled in from cache.
    #[must_use]
    pub fn cached_record_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_cached()).count()
    }

    /// Active articles out of stock: one entry per location holding zero, plus
    /// one entry without a location for an article with no stock row at all.
    #[must_use]
    pub fn zero_stock_active(&self) -> Vec<ZeroStock<'_>> {
        let stocked: BTreeSet<&ArticleId> = self.records.iter().map(|r| &r.article).collect();
        let active = |id: &ArticleId| self.articles.get(id).is_some_and(|a| a.status == ArticleStatus::Active);

        let mut zero: Vec<ZeroStock<'_>> = self
            .records
            .iter()
            .filter(|r| r.quantity == 0 && active(&r.article))
            .map(|r| ZeroStock {
                article: &r.article,
                location: Some(&r.location),
            })
            .collect();
        zero.extend(
            self.articles
                .keys()
                .filter(|id| !stocked.contains(*id) && active(*id))
                .map(|id| ZeroStock {
                    article: id,
                    location: None,
                }),
        );
        zero
    }

    /// Re-tag a stored snapshot as served from cache. The capture date is kept.
    #[must_use]
    pub fn into_replayed(mut self) -> Self {
        self.provenance = Provenance::Replayed;
        self
    }

    /// Fill unreachable locations of a freshly fetched snapshot from `cached`.
    ///
    /// Records of `cached` at the given locations are copied in and tagged
    /// [`RecordOrigin::Cached`]. Locations `cached` knows nothing about end up
    /// in [`missing_locations`](Self::missing_locations). The result is always
    /// [`Provenance::Partial`].
    pub fn fill_from_cache(
        self,
        unreachable: &[LocationId],
        cached: Option<&Snapshot>,
    ) -> Result<Snapshot, SnapshotError> {
        let mut builder = SnapshotBuilder {
            capture_date: self.capture_date,
            captured_at: self.captured_at,
            provenance: Provenance::Partial,
            articles: self.articles,
            locations: self.locations,
            records: self.records,
            missing_locations: self.missing_locations.into_iter().collect(),
        };

        for location in unreachable {
            let Some(c) = cached.filter(|c| c.records_at(location).next().is_some()) else {
                builder.missing_locations.insert(location.clone());
                continue;
            };
            if let Some(loc) = c.locations.get(location) {
                builder.locations.entry(location.clone()).or_insert_with(|| loc.clone());
            }
            for record in c.records_at(location) {
                // Fresh article attributes win over cached ones.
                if let Some(article) = c.article(&record.article) {
                    builder
                        .articles
                        .entry(record.article.clone())
                        .or_insert_with(|| article.clone());
                }
                let from = match record.origin {
                    RecordOrigin::Cached { from } => from,
                    RecordOrigin::Live => record.observed_on,
                };
                builder.records.push(StockRecord {
                    origin: RecordOrigin::Cached { from },
                    ..record.clone()
                });
            }
        }

        builder.build()
    }
}

/// Assembles a [`Snapshot`] and enforces its invariants.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    capture_date: NaiveDate,
    captured_at: NaiveDateTime,
    provenance: Provenance,
    articles: BTreeMap<ArticleId, Article>,
    locations: BTreeMap<LocationId, Location>,
    records: Vec<StockRecord>,
    missing_locations: BTreeSet<LocationId>,
}

impl SnapshotBuilder {
    pub fn new(capture_date: NaiveDate, provenance: Provenance) -> Self {
        Self {
            capture_date,
            captured_at: capture_date.and_time(chrono::NaiveTime::MIN),
            provenance,
            articles: BTreeMap::new(),
            locations: BTreeMap::new(),
            records: Vec::new(),
            missing_locations: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn captured_at(mut self, at: NaiveDateTime) -> Self {
        self.captured_at = at;
        self
    }

    /// Add or replace an article entry.
    #[must_use]
    pub fn article(mut self, article: Article) -> Self {
        self.articles.insert(article.id.clone(), article);
        self
    }

    #[must_use]
    pub fn location(mut self, location: Location) -> Self {
        self.locations.insert(location.id.clone(), location);
        self
    }

    #[must_use]
    pub fn record(mut self, record: StockRecord) -> Self {
        self.records.push(record);
        self
    }

    #[must_use]
    pub fn missing_location(mut self, location: LocationId) -> Self {
        self.missing_locations.insert(location);
        self
    }

    pub fn push_article(&mut self, article: Article) {
        self.articles.insert(article.id.clone(), article);
    }

    pub fn push_location(&mut self, location: Location) {
        self.locations.insert(location.id.clone(), location);
    }

    pub fn push_record(&mut self, record: StockRecord) {
        self.records.push(record);
    }

    pub fn build(mut self) -> Result<Snapshot, SnapshotError> {
        self.records
            .sort_by(|a, b| (&a.article, &a.location).cmp(&(&b.article, &b.location)));

        for pair in self.records.windows(2) {
            if pair[0].article == pair[1].article && pair[0].location == pair[1].location {
                return Err(SnapshotError::DuplicateRecord {
                    article: pair[0].article.clone(),
                    location: pair[0].location.clone(),
                });
            }
        }

        for record in &self.records {
            if !self.articles.contains_key(&record.article) {
                return Err(SnapshotError::UnknownArticle(record.article.clone()));
            }
            if record.origin == RecordOrigin::Live && record.observed_on != self.capture_date {
                return Err(SnapshotError::DateMismatch {
                    article: record.article.clone(),
                    observed_on: record.observed_on,
                    capture_date: self.capture_date,
                });
            }
            self.locations
                .entry(record.location.clone())
                .or_insert_with(|| Location {
                    id: record.location.clone(),
                    name: record.location.to_string(),
                });
        }

        // A location with records is not missing.
        let covered: BTreeSet<&LocationId> = self.records.iter().map(|r| &r.location).collect();
        let missing_locations = self
            .missing_locations
            .iter()
            .filter(|l| !covered.contains(l))
            .cloned()
            .collect();

        Ok(Snapshot {
            capture_date: self.capture_date,
            captured_at: self.captured_at,
            provenance: self.provenance,
            articles: self.articles,
            locations: self.locations,
            records: self.records,
            missing_locations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn base(date: NaiveDate) -> SnapshotBuilder {
        Snapshot::builder(date, Provenance::Live)
            .article(Article::new("A0001", "Mutter M4", ArticleStatus::Active))
            .article(Article::new("A0002", "Scheibe", ArticleStatus::Inactive))
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("aktiv".parse::<ArticleStatus>().unwrap(), ArticleStatus::Active);
        assert_eq!("Inaktiv".parse::<ArticleStatus>().unwrap(), ArticleStatus::Inactive);
        assert_eq!(" active ".parse::<ArticleStatus>().unwrap(), ArticleStatus::Active);
        assert!("gesperrt".parse::<ArticleStatus>().is_err());
    }

    #[test]
    fn test_builder_sorts_records() {
        let snap = base(day(2))
            .record(StockRecord::live("A0002", "Hauptlager", 1, day(2)))
            .record(StockRecord::live("A0001", "Nebenlager", 5, day(2)))
            .record(StockRecord::live("A0001", "Hauptlager", 3, day(2)))
            .build()
            .unwrap();

        let keys: Vec<_> = snap
            .records()
            .iter()
            .map(|r| format!("{}@{}", r.article, r.location))
            .collect();
        assert_eq!(keys, vec!["A0001@Hauptlager", "A0001@Nebenlager", "A0002@Hauptlager"]);
        assert_eq!(snap.total_quantity(&"A0001".into()), 8);
        assert_eq!(snap.locations().len(), 2);
    }

    #[test]
    fn test_builder_rejects_duplicate_pair() {
        let err = base(day(2))
            .record(StockRecord::live("A0001", "Hauptlager", 1, day(2)))
            .record(StockRecord::live("A0001", "Hauptlager", 2, day(2)))
            .build()
            .unwrap_err();
        assert!(matches!(err, SnapshotError::DuplicateRecord { .. }));
    }

    #[test]
    fn test_builder_rejects_unknown_article() {
        let err = base(day(2))
            .record(StockRecord::live("A9999", "Hauptlager", 1, day(2)))
            .build()
            .unwrap_err();
        assert_eq!(err, SnapshotError::UnknownArticle("A9999".into()));
    }

    #[test]
    fn test_builder_rejects_live_record_from_other_day() {
        let err = base(day(2))
            .record(StockRecord::live("A0001", "Hauptlager", 1, day(1)))
            .build()
            .unwrap_err();
        assert!(matches!(err, SnapshotError::DateMismatch { .. }));
    }

    #[test]
    fn test_zero_stock_active_ignores_inactive() {
        let snap = base(day(2))
            .record(StockRecord::live("A0001", "Hauptlager", 0, day(2)))
            .record(StockRecord::live("A0002", "Hauptlager", 0, day(2)))
            .build()
            .unwrap();
        let zero = snap.zero_stock_active();
        assert_eq!(zero.len(), 1);
        assert_eq!(zero[0].article.as_str(), "A0001");
        assert_eq!(zero[0].location, Some(&LocationId::from("Hauptlager")));
    }

    #[test]
    fn test_active_article_without_stock_rows_counts_as_zero() {
        let snap = base(day(2))
            .article(Article::new("A0003", "Unterlegscheibe", ArticleStatus::Active))
            .record(StockRecord::live("A0001", "Hauptlager", 4, day(2)))
            .build()
            .unwrap();

        let zero = snap.zero_stock_active();
        assert_eq!(zero.len(), 1);
        assert_eq!(zero[0].article.as_str(), "A0003");
        assert_eq!(zero[0].location, None);
    }

    #[test]
    fn test_fill_from_cache_tags_cached_records() {
        let cached = base(day(1))
            .record(StockRecord::live("A0001", "Hauptlager", 3, day(1)))
            .record(StockRecord::live("A0001", "Aussenlager", 7, day(1)))
            .build()
            .unwrap();
        let fresh = base(day(2))
            .record(StockRecord::live("A0001", "Hauptlager", 4, day(2)))
            .build()
            .unwrap();

        let merged = fresh
            .fill_from_cache(&["Aussenlager".into(), "Kellerlager".into()], Some(&cached))
            .unwrap();

        assert_eq!(merged.provenance(), Provenance::Partial);
        assert_eq!(merged.records().len(), 2);
        assert_eq!(merged.cached_record_count(), 1);
        let aussenlager: LocationId = "Aussenlager".into();
        let filled = merged.records_at(&aussenlager).next().unwrap();
        assert_eq!(filled.quantity, 7);
        assert_eq!(filled.origin, RecordOrigin::Cached { from: day(1) });
        assert_eq!(merged.missing_locations(), &[LocationId::from("Kellerlager")]);
    }

    #[test]
    fn test_into_replayed_keeps_capture_date() {
        let snap = base(day(1)).build().unwrap().into_replayed();
        assert_eq!(snap.provenance(), Provenance::Replayed);
        assert_eq!(snap.capture_date(), day(1));
    }
}
