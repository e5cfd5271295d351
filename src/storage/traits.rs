use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::inventory::{ArticleId, ArticleStatus, Provenance, Snapshot, SnapshotError, StockRecord};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("No snapshot stored for {0}")]
    NotFound(NaiveDate),
    #[error("Snapshot for {0} already stored (write with WriteMode::Replace to overwrite)")]
    DuplicateSnapshot(NaiveDate),
    #[error("Data corruption detected for snapshot {date}: expected hash {expected}, got {actual}")]
    Corruption {
        date: NaiveDate,
        expected: String,
        actual: String,
    },
    #[error("Stored snapshot for {date} is invalid: {source}")]
    Invalid {
        date: NaiveDate,
        #[source]
        source: SnapshotError,
    },
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Duplicate-date writes and corrupt reads: the data-integrity family.
    #[must_use]
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::DuplicateSnapshot(_) | Self::Corruption { .. } | Self::Invalid { .. }
        )
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// What `put` does when a snapshot for the same capture date exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Refuse with [`StorageError::DuplicateSnapshot`], leaving the stored one untouched
    Reject,
    /// Replace the stored snapshot and all of its records
    Replace,
}

/// Result of a retention purge.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PurgeReport {
    /// Snapshots strictly older than this date were deleted
    pub cutoff: Option<NaiveDate>,
    pub snapshots_deleted: usize,
    pub records_deleted: u64,
}

/// Oldest capture date that survives a purge with `retention_days`.
///
/// `None` when the window reaches past the earliest representable date, in
/// which case nothing is old enough to purge.
#[must_use]
pub fn retention_cutoff(today: NaiveDate, retention_days: u32) -> Option<NaiveDate> {
    chrono::Duration::try_days(i64::from(retention_days)).and_then(|window| today.checked_sub_signed(window))
}

/// One article's stock on one capture date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleHistoryEntry {
    pub date: NaiveDate,
    pub provenance: Provenance,
    /// `None` when the article was not listed that day
    pub status: Option<ArticleStatus>,
    pub records: Vec<StockRecord>,
}

impl ArticleHistoryEntry {
    #[must_use]
    pub fn total_quantity(&self) -> u64 {
        self.records.iter().map(|r| r.quantity).sum()
    }
}

/// Durable persistence of daily snapshots.
///
/// Snapshots are keyed by capture date; records are unique per
/// (article, location, date). Purges delete whole snapshots, never part of one.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn put(&self, snapshot: &Snapshot, mode: WriteMode) -> Result<(), StorageError>;

    async fn get(&self, date: NaiveDate) -> Result<Snapshot, StorageError>;

    /// Most recent snapshot captured strictly before `date`.
    async fn get_latest_before(&self, date: NaiveDate) -> Result<Snapshot, StorageError>;

    /// Delete snapshots captured strictly before `today - retention_days`.
    async fn purge_older_than(
        &self,
        retention_days: u32,
        today: NaiveDate,
    ) -> Result<PurgeReport, StorageError>;

    /// All stored capture dates, ascending.
    async fn dates(&self) -> Result<Vec<NaiveDate>, StorageError>;

    /// Snapshots captured within `from..=to`, ascending by date.
    async fn range(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Snapshot>, StorageError>;

    /// Stock of one article on every stored date within `from..=to`.
    ///
    /// Dates where the article has neither a master row nor a stock record are skipped.
    async fn article_history(
        &self,
        article: &ArticleId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ArticleHistoryEntry>, StorageError> {
        let snapshots = self.range(from, to).await?;
        Ok(snapshots
            .iter()
            .filter_map(|snapshot| {
                let status = snapshot.article(article).map(|a| a.status);
                let records: Vec<StockRecord> =
                    snapshot.records().iter().filter(|r| &r.article == article).cloned().collect();
                if status.is_none() && records.is_empty() {
                    return None;
                }
                Some(ArticleHistoryEntry {
                    date: snapshot.capture_date(),
                    provenance: snapshot.provenance(),
                    status,
                    records,
                })
            })
            .collect())
    }

    /// Like [`get_latest_before`](Self::get_latest_before) but with "nothing stored" as `None`.
    async fn find_latest_before(&self, date: NaiveDate) -> Result<Option<Snapshot>, StorageError> {
        match self.get_latest_before(date).await {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
