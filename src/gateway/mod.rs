// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Data source gateway.
//!
//! The [`DataSourceGateway`] turns the normalized rows of an
//! [`InventoryBackend`] into a [`Snapshot`]. It owns the connection budget
//! (a bounded pool of permits), the per-query timeout, and the concurrent
//! per-location fetch. It does not retry: that is the
//! [`FallbackCoordinator`](crate::resilience::fallback::FallbackCoordinator)'s job.
//!
//! ```text
//! fetch_snapshot()
//!   ├─ articles()            ─┐
//!   ├─ locations()            ├─ each call holds one permit
//!   └─ stock_rows(loc) × N   ─┘  (concurrent, bounded by the pool)
//!          │
//!          ▼
//!   FetchedInventory { snapshot, unreachable }
//! ```

pub mod error;
pub mod sql;

pub use error::{GatewayError, PermanentKind, TransientKind};
pub use sql::{BackendKind, SqlBackend};

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::inventory::{Article, ArticleStatus, Location, LocationId, Provenance, Snapshot, SnapshotBuilder, StockRecord};

/// Article master data row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleRow {
    pub article_id: String,
    pub name: String,
    pub manufacturer: Option<String>,
    pub category: Option<String>,
    pub status: String,
}

/// One stock level row, already scoped to a location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockRow {
    pub article_id: String,
    pub location_id: String,
    pub quantity: i64,
}

/// The normalized query capability every source backend implements.
///
/// Row shapes are identical across backends; dialect differences stay inside
/// the implementation.
#[async_trait]
pub trait InventoryBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Full article catalog with lifecycle status.
    async fn articles(&self) -> Result<Vec<ArticleRow>, GatewayError>;

    /// All stocking points.
    async fn locations(&self) -> Result<Vec<Location>, GatewayError>;

    /// Stock levels at one location.
    async fn stock_rows(&self, location: &LocationId) -> Result<Vec<StockRow>, GatewayError>;

    /// Cheap connectivity check.
    async fn ping(&self) -> Result<(), GatewayError>;
}

/// Result of one fetch: the live data plus the locations that could not be read.
#[derive(Debug, Clone)]
pub struct FetchedInventory {
    /// Live snapshot covering only the reachable locations
    pub snapshot: Snapshot,
    pub unreachable: Vec<(LocationId, GatewayError)>,
}

impl FetchedInventory {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.unreachable.is_empty()
    }

    #[must_use]
    pub fn unreachable_ids(&self) -> Vec<LocationId> {
        self.unreachable.iter().map(|(id, _)| id.clone()).collect()
    }
}

/// Gateway limits.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Maximum concurrent queries (pool capacity)
    pub max_connections: usize,
    /// How long to wait for a free connection before `PoolExhausted`
    pub acquire_timeout: Duration,
    /// Upper bound for a single query
    pub query_timeout: Duration,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            query_timeout: Duration::from_secs(60),
        }
    }
}

pub struct DataSourceGateway {
    backend: Arc<dyn InventoryBackend>,
    permits: Arc<Semaphore>,
    options: GatewayOptions,
    clock: Arc<dyn Clock>,
}

impl DataSourceGateway {
    pub fn new(backend: Arc<dyn InventoryBackend>, options: GatewayOptions, clock: Arc<dyn Clock>) -> Self {
        let permits = Arc::new(Semaphore::new(options.max_connections.max(1)));
        Self {
            backend,
            permits,
            options,
            clock,
        }
    }

    #[must_use]
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Connections currently free.
    #[must_use]
    pub fn available_connections(&self) -> usize {
        self.permits.available_permits()
    }

    /// Connectivity check through the pool.
    pub async fn ping(&self) -> Result<(), GatewayError> {
        self.run("ping", self.backend.ping()).await
    }

    /// Fetch the current inventory from every location.
    ///
    /// Fails as a whole when the catalog or location list cannot be read,
    /// when any location fails permanently, or when every location fails.
    /// Otherwise transient per-location failures are reported in
    /// [`FetchedInventory::unreachable`].
    #[tracing::instrument(skip(self), fields(backend = %self.backend.name()))]
    pub async fn fetch_snapshot(&self) -> Result<FetchedInventory, GatewayError> {
        let started = Instant::now();
        let captured_at = self.clock.now();
        let capture_date = captured_at.date();

        let articles = self.run("articles", self.backend.articles()).await?;
        let locations = self.run("locations", self.backend.locations()).await?;
        debug!(articles = articles.len(), locations = locations.len(), "Catalog loaded");

        // At most one in-flight fetch per permit, so waiting on the pool only
        // measures contention from outside this fetch.
        let backend = &self.backend;
        let results: Vec<_> = stream::iter(locations.iter())
            .map(|location| async move {
                let result = self.run("stock_rows", backend.stock_rows(&location.id)).await;
                (location, result)
            })
            .buffered(self.options.max_connections.max(1))
            .boxed()
            .collect()
            .await;

        let mut builder = SnapshotBuilder::new(capture_date, Provenance::Live).captured_at(captured_at);
        for row in articles {
            builder.push_article(normalize_article(row)?);
        }

        let mut unreachable = Vec::new();
        let mut reached = 0usize;
        for (location, result) in results {
            match result {
                Ok(rows) => {
                    reached += 1;
                    builder.push_location(location.clone());
                    for row in rows {
                        builder.push_record(normalize_stock(row, &location.id, capture_date)?);
                    }
                }
                Err(e) if e.is_retryable() => {
                    warn!(location = %location.id, error = %e, "Location unreachable");
                    unreachable.push((location.id.clone(), e));
                }
                Err(e) => return Err(e),
            }
        }

        if reached == 0 {
            if let Some((_, first)) = unreachable.first() {
                return Err(first.clone());
            }
        }

        let snapshot = builder
            .build()
            .map_err(|e| GatewayError::permanent(PermanentKind::SchemaMismatch, e.to_string()))?;

        crate::metrics::record_records_fetched(self.backend.name(), snapshot.records().len());
        info!(
            records = snapshot.records().len(),
            reached,
            unreachable = unreachable.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Inventory fetched"
        );
        Ok(FetchedInventory { snapshot, unreachable })
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit, GatewayError> {
        let waited = self.options.acquire_timeout;
        match tokio::time::timeout(waited, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_closed)) => Err(GatewayError::transient(
                TransientKind::Connection,
                "connection pool closed",
            )),
            Err(_elapsed) => {
                crate::metrics::record_pool_exhausted(self.backend.name());
                Err(GatewayError::PoolExhausted { waited })
            }
        }
    }

    /// Run one backend call holding a connection permit, bounded by the query timeout.
    async fn run<T, Fut>(&self, operation: &str, query: Fut) -> Result<T, GatewayError>
    where
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let _permit = self.acquire().await?;
        match tokio::time::timeout(self.options.query_timeout, query).await {
            Ok(result) => result,
            Err(_elapsed) => Err(GatewayError::transient(
                TransientKind::Timeout,
                format!("{} exceeded {:?}", operation, self.options.query_timeout),
            )),
        }
    }
}

fn normalize_article(row: ArticleRow) -> Result<Article, GatewayError> {
    let status = row
        .status
        .parse::<ArticleStatus>()
        .map_err(|e| {
            GatewayError::permanent(PermanentKind::SchemaMismatch, format!("article {}: {}", row.article_id, e))
        })?;
    Ok(Article {
        id: row.article_id.into(),
        name: row.name,
        manufacturer: row.manufacturer,
        category: row.category,
        status,
    })
}

fn normalize_stock(
    row: StockRow,
    location: &LocationId,
    capture_date: chrono::NaiveDate,
) -> Result<StockRecord, GatewayError> {
    if row.location_id != location.as_str() {
        return Err(GatewayError::permanent(
            PermanentKind::SchemaMismatch,
            format!("row for location '{}' returned when querying '{}'", row.location_id, location),
        ));
    }
    let quantity = u64::try_from(row.quantity).map_err(|_| {
        GatewayError::permanent(
            PermanentKind::SchemaMismatch,
            format!("negative quantity {} for article {} at {}", row.quantity, row.article_id, location),
        )
    })?;
    Ok(StockRecord::live(row.article_id, location.clone(), quantity, capture_date))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend serving fixed rows, with scripted per-location failures.
    struct FixedBackend {
        articles: Vec<ArticleRow>,
        stock: Vec<StockRow>,
        failing: HashMap<String, GatewayError>,
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FixedBackend {
        fn new() -> Self {
            Self {
                articles: vec![
                    article("A0001", "aktiv"),
                    article("A0002", "inaktiv"),
                ],
                stock: vec![
                    stock("A0001", "1", 10),
                    stock("A0002", "1", 0),
                    stock("A0001", "2", 4),
                ],
                failing: HashMap::new(),
                delay: Duration::ZERO,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    fn article(id: &str, status: &str) -> ArticleRow {
        ArticleRow {
            article_id: id.to_string(),
            name: format!("Artikel {}", id),
            manufacturer: None,
            category: None,
            status: status.to_string(),
        }
    }

    fn stock(article: &str, location: &str, quantity: i64) -> StockRow {
        StockRow {
            article_id: article.to_string(),
            location_id: location.to_string(),
            quantity,
        }
    }

    #[async_trait]
    impl InventoryBackend for FixedBackend {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn articles(&self) -> Result<Vec<ArticleRow>, GatewayError> {
            Ok(self.articles.clone())
        }

        async fn locations(&self) -> Result<Vec<Location>, GatewayError> {
            let mut ids: Vec<String> = self.stock.iter().map(|s| s.location_id.clone()).collect();
            ids.extend(self.failing.keys().cloned());
            ids.sort();
            ids.dedup();
            Ok(ids
                .into_iter()
                .map(|id| Location { id: id.clone().into(), name: format!("Lager {}", id) })
                .collect())
        }

        async fn stock_rows(&self, location: &LocationId) -> Result<Vec<StockRow>, GatewayError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Some(err) = self.failing.get(location.as_str()) {
                return Err(err.clone());
            }
            Ok(self
                .stock
                .iter()
                .filter(|s| s.location_id == location.as_str())
                .cloned()
                .collect())
        }

        async fn ping(&self) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    fn clock() -> Arc<dyn Clock> {
        Arc::new(ManualClock::at_date(NaiveDate::from_ymd_opt(2026, 4, 1).unwrap()))
    }

    fn gateway(backend: FixedBackend, options: GatewayOptions) -> DataSourceGateway {
        DataSourceGateway::new(Arc::new(backend), options, clock())
    }

    #[tokio::test]
    async fn test_fetch_complete_snapshot() {
        let gw = gateway(FixedBackend::new(), GatewayOptions::default());
        let fetched = gw.fetch_snapshot().await.unwrap();

        assert!(fetched.is_complete());
        let snap = fetched.snapshot;
        assert_eq!(snap.capture_date(), NaiveDate::from_ymd_opt(2026, 4, 1).unwrap());
        assert_eq!(snap.provenance(), Provenance::Live);
        assert_eq!(snap.records().len(), 3);
        assert_eq!(snap.total_quantity(&"A0001".into()), 14);
        assert_eq!(snap.locations()[&LocationId::from("1")].name, "Lager 1");
    }

    #[tokio::test]
    async fn test_transient_location_failure_is_reported_not_fatal() {
        let mut backend = FixedBackend::new();
        backend.failing.insert(
            "3".to_string(),
            GatewayError::transient(TransientKind::Connection, "reset by peer"),
        );
        let gw = gateway(backend, GatewayOptions::default());

        let fetched = gw.fetch_snapshot().await.unwrap();
        assert!(!fetched.is_complete());
        assert_eq!(fetched.unreachable_ids(), vec![LocationId::from("3")]);
        assert_eq!(fetched.snapshot.records().len(), 3);
    }

    #[tokio::test]
    async fn test_permanent_location_failure_fails_fetch() {
        let mut backend = FixedBackend::new();
        backend.failing.insert(
            "2".to_string(),
            GatewayError::permanent(PermanentKind::Authentication, "access denied"),
        );
        let gw = gateway(backend, GatewayOptions::default());

        let err = gw.fetch_snapshot().await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_all_locations_failing_is_transient_error() {
        let mut backend = FixedBackend::new();
        backend.stock.clear();
        backend.failing.insert("1".into(), GatewayError::transient(TransientKind::Deadlock, "deadlock"));
        backend.failing.insert("2".into(), GatewayError::transient(TransientKind::Timeout, "timeout"));
        let gw = gateway(backend, GatewayOptions::default());

        let err = gw.fetch_snapshot().await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_negative_quantity_is_schema_mismatch() {
        let mut backend = FixedBackend::new();
        backend.stock.push(stock("A0002", "2", -3));
        let gw = gateway(backend, GatewayOptions::default());

        let err = gw.fetch_snapshot().await.unwrap_err();
        assert!(matches!(err, GatewayError::Permanent { kind: PermanentKind::SchemaMismatch, .. }));
    }

    #[tokio::test]
    async fn test_unknown_status_is_schema_mismatch() {
        let mut backend = FixedBackend::new();
        backend.articles.push(article("A0003", "gesperrt"));
        let gw = gateway(backend, GatewayOptions::default());

        let err = gw.fetch_snapshot().await.unwrap_err();
        assert!(matches!(err, GatewayError::Permanent { kind: PermanentKind::SchemaMismatch, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bounded_by_pool() {
        let mut backend = FixedBackend::new();
        for loc in 3..10 {
            backend.stock.push(stock("A0001", &loc.to_string(), 1));
        }
        backend.delay = Duration::from_millis(50);
        let backend = Arc::new(backend);
        let options = GatewayOptions {
            max_connections: 2,
            ..Default::default()
        };
        let gw = DataSourceGateway::new(backend.clone(), options, clock());

        gw.fetch_snapshot().await.unwrap();
        assert!(backend.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(gw.available_connections(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_exhausted_after_acquire_timeout() {
        let options = GatewayOptions {
            max_connections: 1,
            acquire_timeout: Duration::from_secs(2),
            query_timeout: Duration::from_secs(60),
        };
        let gw = gateway(FixedBackend::new(), options);

        let _held = gw.permits.clone().acquire_owned().await.unwrap();
        let err = gw.ping().await.unwrap_err();
        assert!(matches!(err, GatewayError::PoolExhausted { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_more_locations_than_pool_does_not_exhaust_it() {
        let mut backend = FixedBackend::new();
        backend.stock.clear();
        for loc in 0..40 {
            backend.stock.push(stock("A0001", &format!("L{:02}", loc), 1));
        }
        backend.delay = Duration::from_secs(10);
        let backend = Arc::new(backend);
        let options = GatewayOptions {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            query_timeout: Duration::from_secs(60),
        };
        let gw = DataSourceGateway::new(backend.clone(), options, clock());

        let fetched = gw.fetch_snapshot().await.unwrap();
        assert!(fetched.is_complete());
        assert_eq!(fetched.snapshot.locations().len(), 40);
        assert_eq!(fetched.snapshot.records().len(), 40);
        assert!(backend.peak.load(Ordering::SeqCst) <= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_query_times_out_as_transient() {
        let mut backend = FixedBackend::new();
        backend.delay = Duration::from_secs(120);
        let options = GatewayOptions {
            query_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let gw = gateway(backend, options);

        let err = gw.fetch_snapshot().await.unwrap_err();
        assert!(matches!(err, GatewayError::Transient { kind: TransientKind::Timeout, .. }));
    }
}
