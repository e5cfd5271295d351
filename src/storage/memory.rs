use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;

use crate::inventory::Snapshot;
use super::traits::{retention_cutoff, PurgeReport, SnapshotStore, StorageError, WriteMode};

/// Snapshot store kept in process memory, ordered by capture date.
pub struct InMemorySnapshotStore {
    data: RwLock<BTreeMap<NaiveDate, Snapshot>>,
}

impl InMemorySnapshotStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
        }
    }

    /// Get current snapshot count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Total stock records across all snapshots
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.data.read().values().map(|s| s.records().len()).sum()
    }
}

impl Default for InMemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn put(&self, snapshot: &Snapshot, mode: WriteMode) -> Result<(), StorageError> {
        let date = snapshot.capture_date();
        let mut data = self.data.write();
        if mode == WriteMode::Reject && data.contains_key(&date) {
            return Err(StorageError::DuplicateSnapshot(date));
        }
        data.insert(date, snapshot.clone());
        Ok(())
    }

    async fn get(&self, date: NaiveDate) -> Result<Snapshot, StorageError> {
        self.data
            .read()
            .get(&date)
            .cloned()
            .ok_or(StorageError::NotFound(date))
    }

    async fn get_latest_before(&self, date: NaiveDate) -> Result<Snapshot, StorageError> {
        self.data
            .read()
            .range(..date)
            .next_back()
            .map(|(_, s)| s.clone())
            .ok_or(StorageError::NotFound(date))
    }

    async fn purge_older_than(
        &self,
        retention_days: u32,
        today: NaiveDate,
    ) -> Result<PurgeReport, StorageError> {
        let Some(cutoff) = retention_cutoff(today, retention_days) else {
            return Ok(PurgeReport::default());
        };
        let mut data = self.data.write();
        let kept = data.split_off(&cutoff);
        let purged = std::mem::replace(&mut *data, kept);

        Ok(PurgeReport {
            cutoff: Some(cutoff),
            snapshots_deleted: purged.len(),
            records_deleted: purged.values().map(|s| s.records().len() as u64).sum(),
        })
    }

    async fn dates(&self) -> Result<Vec<NaiveDate>, StorageError> {
        Ok(self.data.read().keys().copied().collect())
    }

    async fn range(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Snapshot>, StorageError> {
        if from > to {
            return Ok(Vec::new());
        }
        Ok(self.data.read().range(from..=to).map(|(_, s)| s.clone()).collect())
    }
}
