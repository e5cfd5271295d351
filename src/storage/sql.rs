// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL snapshot store (SQLite or MySQL).
//!
//! One header row per snapshot, one row per stock record:
//! ```sql
//! CREATE TABLE snapshots (
//!   capture_date CHAR(10) PRIMARY KEY,   -- YYYY-MM-DD, sorts as a date
//!   captured_at VARCHAR(32) NOT NULL,
//!   provenance VARCHAR(16) NOT NULL,     -- live | partial
//!   content_hash CHAR(64) NOT NULL,      -- sha256 of the canonical JSON form
//!   articles LONGTEXT NOT NULL,          -- JSON
//!   locations LONGTEXT NOT NULL,         -- JSON
//!   missing_locations TEXT NOT NULL      -- JSON
//! )
//! CREATE TABLE stock_records (
//!   capture_date CHAR(10), article_id VARCHAR(64), location_id VARCHAR(64),
//!   quantity BIGINT NOT NULL, observed_on CHAR(10) NOT NULL, cached_from CHAR(10),
//!   PRIMARY KEY (capture_date, article_id, location_id)
//! )
//! ```
//!
//! Every read recomputes the content hash; a mismatch is reported as
//! [`StorageError::Corruption`] rather than returning altered data.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sha2::{Digest, Sha256};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use std::time::Duration;
use tracing::{debug, info};

use super::traits::{retention_cutoff, PurgeReport, SnapshotStore, StorageError, WriteMode};
use crate::db::{install_drivers, opt_text, text};
use crate::inventory::{
    Article, ArticleId, Location, LocationId, Provenance, RecordOrigin, Snapshot, SnapshotBuilder, StockRecord,
};
use crate::resilience::retry::{retry, RetryPolicy};

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Records per multi-row INSERT (6 binds each, well under SQLite's limit).
const CHUNK_SIZE: usize = 100;

pub struct SqlSnapshotStore {
    pool: AnyPool,
    is_sqlite: bool,
}

impl SqlSnapshotStore {
    /// Open (and create if needed) the store with startup-mode retry.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");

        let pool = retry("snapshot_db_connect", &RetryPolicy::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(if is_sqlite { 1 } else { 5 })
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(backend)
        })
        .await?;

        let store = Self { pool, is_sqlite };

        if is_sqlite {
            store.enable_wal_mode().await?;
        }

        store.init_schema().await?;
        Ok(store)
    }

    /// Open a SQLite database file, creating it when missing.
    pub async fn open_sqlite(path: &std::path::Path) -> Result<Self, StorageError> {
        Self::new(&format!("sqlite://{}?mode=rwc", path.display())).await
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let statements: [&str; 2] = if self.is_sqlite {
            [
                r#"
                CREATE TABLE IF NOT EXISTS snapshots (
                    capture_date TEXT PRIMARY KEY,
                    captured_at TEXT NOT NULL,
                    provenance TEXT NOT NULL,
                    content_hash TEXT NOT NULL,
                    articles TEXT NOT NULL,
                    locations TEXT NOT NULL,
                    missing_locations TEXT NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS stock_records (
                    capture_date TEXT NOT NULL,
                    article_id TEXT NOT NULL,
                    location_id TEXT NOT NULL,
                    quantity INTEGER NOT NULL,
                    observed_on TEXT NOT NULL,
                    cached_from TEXT,
                    PRIMARY KEY (capture_date, article_id, location_id)
                )
                "#,
            ]
        } else {
            [
                r#"
                CREATE TABLE IF NOT EXISTS snapshots (
                    capture_date CHAR(10) PRIMARY KEY,
                    captured_at VARCHAR(32) NOT NULL,
                    provenance VARCHAR(16) NOT NULL,
                    content_hash CHAR(64) NOT NULL,
                    articles LONGTEXT NOT NULL,
                    locations LONGTEXT NOT NULL,
                    missing_locations TEXT NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS stock_records (
                    capture_date CHAR(10) NOT NULL,
                    article_id VARCHAR(64) NOT NULL,
                    location_id VARCHAR(64) NOT NULL,
                    quantity BIGINT NOT NULL,
                    observed_on CHAR(10) NOT NULL,
                    cached_from CHAR(10),
                    PRIMARY KEY (capture_date, article_id, location_id)
                )
                "#,
            ]
        };

        for sql in statements {
            retry("snapshot_db_init_schema", &RetryPolicy::startup(), || async {
                sqlx::query(sql).execute(&self.pool).await.map_err(backend)
            })
            .await?;
        }

        Ok(())
    }

    async fn insert_records(
        tx: &mut sqlx::Transaction<'_, sqlx::Any>,
        date: &str,
        records: &[StockRecord],
    ) -> Result<(), StorageError> {
        for chunk in records.chunks(CHUNK_SIZE) {
            let placeholders: Vec<&str> = chunk.iter().map(|_| "(?, ?, ?, ?, ?, ?)").collect();
            let sql = format!(
                "INSERT INTO stock_records (capture_date, article_id, location_id, quantity, observed_on, cached_from) VALUES {}",
                placeholders.join(", ")
            );

            let mut query = sqlx::query(&sql);
            for record in chunk {
                let quantity = i64::try_from(record.quantity)
                    .map_err(|_| StorageError::Backend(format!("quantity {} out of range", record.quantity)))?;
                let cached_from = match record.origin {
                    RecordOrigin::Live => None,
                    RecordOrigin::Cached { from } => Some(from.format(DATE_FORMAT).to_string()),
                };
                query = query
                    .bind(date)
                    .bind(record.article.as_str())
                    .bind(record.location.as_str())
                    .bind(quantity)
                    .bind(record.observed_on.format(DATE_FORMAT).to_string())
                    .bind(cached_from);
            }
            query.execute(&mut **tx).await.map_err(backend)?;
        }
        Ok(())
    }

    /// Fetch the header row for `date` (or the latest one strictly before it).
    async fn fetch_header(&self, date: NaiveDate, strictly_before: bool) -> Result<Option<AnyRow>, StorageError> {
        let sql = if strictly_before {
            "SELECT capture_date, captured_at, provenance, content_hash, articles, locations, missing_locations \
             FROM snapshots WHERE capture_date < ? ORDER BY capture_date DESC LIMIT 1"
        } else {
            "SELECT capture_date, captured_at, provenance, content_hash, articles, locations, missing_locations \
             FROM snapshots WHERE capture_date = ?"
        };
        let key = date.format(DATE_FORMAT).to_string();

        retry("snapshot_db_get", &RetryPolicy::query(), || async {
            sqlx::query(sql)
                .bind(&key)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)
        })
        .await
    }

    async fn load(&self, header: AnyRow) -> Result<Snapshot, StorageError> {
        let capture_date = parse_date(&text(&header, "capture_date").map_err(backend)?)?;
        let key = capture_date.format(DATE_FORMAT).to_string();

        let rows = retry("snapshot_db_records", &RetryPolicy::query(), || async {
            sqlx::query(
                "SELECT article_id, location_id, quantity, observed_on, cached_from \
                 FROM stock_records WHERE capture_date = ? ORDER BY article_id, location_id",
            )
            .bind(&key)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)
        })
        .await?;

        let expected_hash = text(&header, "content_hash").map_err(backend)?;
        let snapshot = decode(capture_date, &header, &rows)?;

        let actual_hash = content_hash(&snapshot)?;
        if actual_hash != expected_hash {
            return Err(StorageError::Corruption {
                date: capture_date,
                expected: expected_hash,
                actual: actual_hash,
            });
        }
        Ok(snapshot)
    }
}

#[async_trait]
impl SnapshotStore for SqlSnapshotStore {
    async fn put(&self, snapshot: &Snapshot, mode: WriteMode) -> Result<(), StorageError> {
        let date = snapshot.capture_date();
        let key = date.format(DATE_FORMAT).to_string();
        let hash = content_hash(snapshot)?;
        let articles = serde_json::to_string(snapshot.articles()).map_err(backend)?;
        let locations = serde_json::to_string(snapshot.locations()).map_err(backend)?;
        let missing = serde_json::to_string(snapshot.missing_locations()).map_err(backend)?;

        let mut tx = self.pool.begin().await.map_err(backend)?;

        let existing = sqlx::query("SELECT 1 FROM snapshots WHERE capture_date = ?")
            .bind(&key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;
        if existing.is_some() {
            if mode == WriteMode::Reject {
                return Err(StorageError::DuplicateSnapshot(date));
            }
            sqlx::query("DELETE FROM stock_records WHERE capture_date = ?")
                .bind(&key)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
            sqlx::query("DELETE FROM snapshots WHERE capture_date = ?")
                .bind(&key)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        sqlx::query(
            "INSERT INTO snapshots (capture_date, captured_at, provenance, content_hash, articles, locations, missing_locations) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&key)
        .bind(snapshot.captured_at().format(DATETIME_FORMAT).to_string())
        .bind(snapshot.provenance().as_str())
        .bind(&hash)
        .bind(&articles)
        .bind(&locations)
        .bind(&missing)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        Self::insert_records(&mut tx, &key, snapshot.records()).await?;

        tx.commit().await.map_err(backend)?;

        debug!(
            date = %date,
            records = snapshot.records().len(),
            provenance = %snapshot.provenance(),
            "Snapshot stored"
        );
        Ok(())
    }

    async fn get(&self, date: NaiveDate) -> Result<Snapshot, StorageError> {
        match self.fetch_header(date, false).await? {
            Some(header) => self.load(header).await,
            None => Err(StorageError::NotFound(date)),
        }
    }

    async fn get_latest_before(&self, date: NaiveDate) -> Result<Snapshot, StorageError> {
        match self.fetch_header(date, true).await? {
            Some(header) => self.load(header).await,
            None => Err(StorageError::NotFound(date)),
        }
    }

    async fn purge_older_than(&self, retention_days: u32, today: NaiveDate) -> Result<PurgeReport, StorageError> {
        let Some(cutoff) = retention_cutoff(today, retention_days) else {
            return Ok(PurgeReport::default());
        };
        let key = cutoff.format(DATE_FORMAT).to_string();

        let mut tx = self.pool.begin().await.map_err(backend)?;

        let records = sqlx::query("DELETE FROM stock_records WHERE capture_date < ?")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        let snapshots = sqlx::query("DELETE FROM snapshots WHERE capture_date < ?")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        tx.commit().await.map_err(backend)?;

        let report = PurgeReport {
            cutoff: Some(cutoff),
            snapshots_deleted: usize::try_from(snapshots.rows_affected()).unwrap_or(usize::MAX),
            records_deleted: records.rows_affected(),
        };
        if report.snapshots_deleted > 0 {
            info!(
                cutoff = %cutoff,
                snapshots = report.snapshots_deleted,
                records = report.records_deleted,
                "Purged expired snapshots"
            );
        }
        Ok(report)
    }

    async fn dates(&self) -> Result<Vec<NaiveDate>, StorageError> {
        let rows = retry("snapshot_db_dates", &RetryPolicy::query(), || async {
            sqlx::query("SELECT capture_date FROM snapshots ORDER BY capture_date")
                .fetch_all(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;

        rows.iter()
            .map(|row| parse_date(&text(row, "capture_date").map_err(backend)?))
            .collect()
    }

    async fn range(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Snapshot>, StorageError> {
        let from_key = from.format(DATE_FORMAT).to_string();
        let to_key = to.format(DATE_FORMAT).to_string();
        let headers = retry("snapshot_db_range", &RetryPolicy::query(), || async {
            sqlx::query(
                "SELECT capture_date, captured_at, provenance, content_hash, articles, locations, missing_locations \
                 FROM snapshots WHERE capture_date >= ? AND capture_date <= ? ORDER BY capture_date",
            )
            .bind(&from_key)
            .bind(&to_key)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)
        })
        .await?;

        let mut snapshots = Vec::with_capacity(headers.len());
        for header in headers {
            snapshots.push(self.load(header).await?);
        }
        Ok(snapshots)
    }
}

fn backend(e: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// A stored column that no longer parses.
fn unreadable(date: NaiveDate, column: &'static str) -> impl Fn(serde_json::Error) -> StorageError {
    move |e| StorageError::Corruption {
        date,
        expected: format!("valid JSON in {}", column),
        actual: e.to_string(),
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, StorageError> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
        .map_err(|e| StorageError::Backend(format!("bad stored date '{}': {}", s, e)))
}

/// Hash of the canonical JSON form. Map ordering is deterministic (BTreeMap,
/// sorted records), so equal snapshots hash equally.
pub fn content_hash(snapshot: &Snapshot) -> Result<String, StorageError> {
    let bytes = serde_json::to_vec(snapshot).map_err(backend)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

fn decode(capture_date: NaiveDate, header: &AnyRow, rows: &[AnyRow]) -> Result<Snapshot, StorageError> {
    let stamp = text(header, "captured_at").map_err(backend)?;
    let captured_at =
        NaiveDateTime::parse_from_str(&stamp, DATETIME_FORMAT).map_err(|e| StorageError::Corruption {
            date: capture_date,
            expected: "capture timestamp".to_string(),
            actual: format!("'{}': {}", stamp, e),
        })?;
    let provenance: Provenance = text(header, "provenance")
        .map_err(backend)?
        .parse()
        .map_err(|source| StorageError::Invalid {
            date: capture_date,
            source,
        })?;
    let articles: BTreeMap<ArticleId, Article> = serde_json::from_str(&text(header, "articles").map_err(backend)?)
        .map_err(unreadable(capture_date, "articles"))?;
    let locations: BTreeMap<LocationId, Location> = serde_json::from_str(&text(header, "locations").map_err(backend)?)
        .map_err(unreadable(capture_date, "locations"))?;
    let missing: Vec<LocationId> = serde_json::from_str(&text(header, "missing_locations").map_err(backend)?)
        .map_err(unreadable(capture_date, "missing_locations"))?;

    let mut builder = SnapshotBuilder::new(capture_date, provenance).captured_at(captured_at);
    for article in articles.into_values() {
        builder.push_article(article);
    }
    for location in locations.into_values() {
        builder.push_location(location);
    }
    for id in missing {
        builder = builder.missing_location(id);
    }
    for row in rows {
        let quantity: i64 = row.try_get("quantity").map_err(backend)?;
        let origin = match opt_text(row, "cached_from").map_err(backend)? {
            Some(from) => RecordOrigin::Cached { from: parse_date(&from)? },
            None => RecordOrigin::Live,
        };
        builder.push_record(StockRecord {
            article: text(row, "article_id").map_err(backend)?.into(),
            location: text(row, "location_id").map_err(backend)?.into(),
            quantity: u64::try_from(quantity).map_err(|_| StorageError::Corruption {
                date: capture_date,
                expected: "non-negative quantity".to_string(),
                actual: quantity.to_string(),
            })?,
            observed_on: parse_date(&text(row, "observed_on").map_err(backend)?)?,
            origin,
        });
    }

    builder.build().map_err(|source| StorageError::Invalid {
        date: capture_date,
        source,
    })
}
