//! End-to-end cycles over SQLite files: a source database in the warehouse
//! schema and the local snapshot store.
//!
//! Run with: `cargo test --test sqlite`

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tempfile::TempDir;

use inventory_tracker::clock::ManualClock;
use inventory_tracker::{
    ArticleId, BackendKind, Classification, CycleState, DataSourceGateway, GatewayOptions, LocationId, Provenance,
    RetryPolicy, Scheduler, SchedulerSettings, SnapshotStore, SqlBackend, SqlSnapshotStore,
};

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
}

fn source_url(dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", dir.join("warenwirtschaft.db").display())
}

async fn seed_source(backend: &SqlBackend) {
    let pool = backend.pool();
    for stmt in [
        "CREATE TABLE artikel (artikel_id INTEGER PRIMARY KEY, artikelnummer TEXT, bezeichnung TEXT, hersteller TEXT, kategorie TEXT, status TEXT)",
        "CREATE TABLE lagerbestand (artikel_id INTEGER, lager_id INTEGER, lager_name TEXT, bestand INTEGER)",
        "INSERT INTO artikel VALUES (1, 'A0001', 'Mutter M4', 'Wuerth', 'Kleinteile', 'aktiv')",
        "INSERT INTO artikel VALUES (2, 'A0002', 'Scheibe 4mm', NULL, 'Kleinteile', 'aktiv')",
        "INSERT INTO lagerbestand VALUES (1, 1, 'Hauptlager', 40)",
        "INSERT INTO lagerbestand VALUES (2, 1, 'Hauptlager', 100)",
        "INSERT INTO lagerbestand VALUES (1, 2, 'Aussenlager', 5)",
    ] {
        sqlx::query(stmt).execute(&pool).await.unwrap();
    }
}

async fn execute(backend: &SqlBackend, stmt: &str) {
    sqlx::query(stmt).execute(&backend.pool()).await.unwrap();
}

struct Setup {
    _dir: TempDir,
    cache_path: std::path::PathBuf,
    backend: Arc<SqlBackend>,
    store: Arc<SqlSnapshotStore>,
    clock: Arc<ManualClock>,
    scheduler: Scheduler,
}

async fn setup() -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let options = GatewayOptions {
        max_connections: 2,
        ..Default::default()
    };
    let backend = Arc::new(SqlBackend::connect_lazy(BackendKind::Sqlite, &source_url(dir.path()), &options).unwrap());
    seed_source(&backend).await;

    let cache_path = dir.path().join("cache").join("snapshots.db");
    std::fs::create_dir_all(cache_path.parent().unwrap()).unwrap();
    let store = Arc::new(SqlSnapshotStore::open_sqlite(&cache_path).await.unwrap());

    let clock = Arc::new(ManualClock::new(day(2).and_hms_opt(23, 0, 0).unwrap()));
    let gateway = DataSourceGateway::new(backend.clone(), options, clock.clone());
    let scheduler = Scheduler::builder(gateway, store.clone())
        .clock(clock.clone())
        .settings(SchedulerSettings {
            retry: RetryPolicy::fixed(2, Duration::from_millis(10)),
            resync_after: None,
            ..Default::default()
        })
        .build();

    Setup {
        _dir: dir,
        cache_path,
        backend,
        store,
        clock,
        scheduler,
    }
}

#[tokio::test]
async fn test_two_days_of_polling_are_stored_and_compared() {
    let s = setup().await;

    let first = s.scheduler.run_now().await.unwrap();
    assert_eq!(first.state, CycleState::Succeeded);
    assert!(first.no_prior_data);

    s.clock.set(day(3).and_hms_opt(23, 0, 0).unwrap());
    execute(&s.backend, "UPDATE lagerbestand SET bestand = 30 WHERE artikel_id = 1 AND lager_id = 1").await;
    execute(&s.backend, "UPDATE lagerbestand SET bestand = 0 WHERE artikel_id = 2").await;

    let second = s.scheduler.run_now().await.unwrap();
    assert_eq!(second.state, CycleState::Succeeded);
    assert_eq!(second.reference_date, Some(day(2)));
    assert_eq!(second.counts.decreased, 1);
    assert_eq!(second.counts.zeroed, 1);
    assert_eq!(second.counts.unchanged, 1);
    assert_eq!(second.highlights[0].classification, Classification::Zeroed);
    assert_eq!(second.highlights[1].percent.value(), Some(-25.0));

    assert_eq!(s.store.dates().await.unwrap(), vec![day(2), day(3)]);
}

#[tokio::test]
async fn test_history_survives_reopening_the_store() {
    let s = setup().await;
    s.scheduler.run_now().await.unwrap();
    s.scheduler.stop().await;

    let reopened = SqlSnapshotStore::open_sqlite(&s.cache_path).await.unwrap();
    let snapshot = reopened.get(day(2)).await.unwrap();
    assert_eq!(snapshot.provenance(), Provenance::Live);
    assert_eq!(snapshot.records().len(), 3);
    assert_eq!(snapshot.total_quantity(&ArticleId::from("A0001")), 45);
    assert_eq!(snapshot.locations()[&LocationId::from("2")].name, "Aussenlager");
}

#[tokio::test]
async fn test_dropped_source_table_fails_without_retry() {
    let s = setup().await;
    s.scheduler.run_now().await.unwrap();

    s.clock.set(day(3).and_hms_opt(23, 0, 0).unwrap());
    execute(&s.backend, "DROP TABLE lagerbestand").await;

    let summary = s.scheduler.run_now().await.unwrap();
    assert_eq!(summary.state, CycleState::Failed);
    assert_eq!(summary.attempts, 1);
    assert_eq!(s.store.dates().await.unwrap(), vec![day(2)]);
}

#[tokio::test]
async fn test_active_article_without_stock_rows_is_reported_as_zero_stock() {
    let s = setup().await;
    execute(&s.backend, "INSERT INTO artikel VALUES (3, 'A0003', 'Unterlegscheibe 6mm', NULL, 'Kleinteile', 'aktiv')").await;
    execute(&s.backend, "INSERT INTO artikel VALUES (4, 'A0004', 'Federring', NULL, 'Kleinteile', 'inaktiv')").await;

    let summary = s.scheduler.run_now().await.unwrap();
    assert_eq!(summary.state, CycleState::Succeeded);
    assert_eq!(summary.zero_stock_active, 1);

    let stored = s.store.get(day(2)).await.unwrap();
    assert!(stored.article(&ArticleId::from("A0003")).is_some());
    assert_eq!(stored.total_quantity(&ArticleId::from("A0003")), 0);
}
