// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL source backend (MySQL or SQLite) over the sqlx `Any` driver.
//!
//! Expected source schema:
//! ```sql
//! artikel      (artikel_id, artikelnummer, bezeichnung, hersteller, kategorie, status)
//! lagerbestand (artikel_id, lager_id, lager_name, bestand)
//! ```
//!
//! Both dialects return the same row shape. They differ in how integers are
//! cast (`SIGNED`/`CHAR` vs `INTEGER`/`TEXT`) and in which error codes mean
//! "try again".

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::any::AnyPoolOptions;
use sqlx::error::DatabaseError;
use sqlx::mysql::MySqlDatabaseError;
use sqlx::{AnyPool, Row};
use tracing::debug;

use super::{ArticleRow, GatewayError, GatewayOptions, InventoryBackend, PermanentKind, StockRow, TransientKind};
use crate::db::{install_drivers, opt_text, text};
use crate::inventory::{Location, LocationId};

/// Which SQL dialect the source speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[serde(alias = "mariadb")]
    Mysql,
    Sqlite,
}

impl BackendKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mysql => "mysql",
            Self::Sqlite => "sqlite",
        }
    }

    fn int_type(&self) -> &'static str {
        match self {
            Self::Mysql => "SIGNED",
            Self::Sqlite => "INTEGER",
        }
    }

    fn text_type(&self) -> &'static str {
        match self {
            Self::Mysql => "CHAR",
            Self::Sqlite => "TEXT",
        }
    }

    fn articles_sql(&self) -> String {
        "SELECT artikelnummer AS article_id, bezeichnung AS name, hersteller AS manufacturer, \
         kategorie AS category, status \
         FROM artikel ORDER BY artikelnummer"
            .to_string()
    }

    fn locations_sql(&self) -> String {
        format!(
            "SELECT DISTINCT CAST(lager_id AS {t}) AS location_id, lager_name AS location_name \
             FROM lagerbestand ORDER BY location_id",
            t = self.text_type()
        )
    }

    fn stock_sql(&self) -> String {
        format!(
            "SELECT a.artikelnummer AS article_id, CAST(l.lager_id AS {t}) AS location_id, \
             CAST(COALESCE(l.bestand, 0) AS {i}) AS quantity \
             FROM artikel a JOIN lagerbestand l ON a.artikel_id = l.artikel_id \
             WHERE CAST(l.lager_id AS {t}) = ? \
             ORDER BY a.artikelnummer",
            t = self.text_type(),
            i = self.int_type()
        )
    }
}

/// Source database reached through a lazily connecting pool.
///
/// Construction never touches the network: an unreachable database at
/// startup shows up as transient failures on the first cycle instead.
pub struct SqlBackend {
    pool: AnyPool,
    kind: BackendKind,
    label: String,
}

impl SqlBackend {
    pub fn connect_lazy(kind: BackendKind, url: &str, options: &GatewayOptions) -> Result<Self, GatewayError> {
        install_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(u32::try_from(options.max_connections.max(1)).unwrap_or(u32::MAX))
            .acquire_timeout(options.acquire_timeout)
            .idle_timeout(Duration::from_secs(300))
            .connect_lazy(url)
            .map_err(|e| classify(e, options.acquire_timeout))?;

        debug!(backend = kind.as_str(), "Source pool created");
        Ok(Self {
            pool,
            kind,
            label: format!("sql:{}", kind.as_str()),
        })
    }

    #[must_use]
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Get a clone of the connection pool (tests seed fixtures through it).
    #[must_use]
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    fn classify(&self, err: sqlx::Error) -> GatewayError {
        classify(err, self.pool.options().get_acquire_timeout())
    }
}

#[async_trait]
impl InventoryBackend for SqlBackend {
    fn name(&self) -> &str {
        &self.label
    }

    async fn articles(&self) -> Result<Vec<ArticleRow>, GatewayError> {
        let rows = sqlx::query(&self.kind.articles_sql())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.classify(e))?;

        rows.iter()
            .map(|row| {
                Ok(ArticleRow {
                    article_id: text(row, "article_id")?,
                    name: opt_text(row, "name")?.unwrap_or_default(),
                    manufacturer: opt_text(row, "manufacturer")?,
                    category: opt_text(row, "category")?,
                    status: text(row, "status")?,
                })
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(|e| self.classify(e))
    }

    async fn locations(&self) -> Result<Vec<Location>, GatewayError> {
        let rows = sqlx::query(&self.kind.locations_sql())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.classify(e))?;

        let mut locations: Vec<Location> = Vec::with_capacity(rows.len());
        for row in &rows {
            let id = text(row, "location_id").map_err(|e| self.classify(e))?;
            let name = opt_text(row, "location_name").map_err(|e| self.classify(e))?;
            // One location can carry several spellings of its name.
            if locations.last().is_some_and(|l| l.id.as_str() == id) {
                continue;
            }
            locations.push(Location {
                name: name.unwrap_or_else(|| id.clone()),
                id: LocationId::new(id),
            });
        }
        Ok(locations)
    }

    async fn stock_rows(&self, location: &LocationId) -> Result<Vec<StockRow>, GatewayError> {
        let rows = sqlx::query(&self.kind.stock_sql())
            .bind(location.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.classify(e))?;

        rows.iter()
            .map(|row| {
                Ok(StockRow {
                    article_id: text(row, "article_id")?,
                    location_id: text(row, "location_id")?,
                    quantity: row.try_get::<i64, _>("quantity")?,
                })
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(|e| self.classify(e))
    }

    async fn ping(&self) -> Result<(), GatewayError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| self.classify(e))
    }
}

/// Map a driver error onto the gateway's transient/permanent split.
pub fn classify(err: sqlx::Error, acquire_timeout: Duration) -> GatewayError {
    use sqlx::Error as E;

    match err {
        E::PoolTimedOut => GatewayError::PoolExhausted {
            waited: acquire_timeout,
        },
        E::Io(_) | E::Tls(_) | E::PoolClosed | E::WorkerCrashed | E::Protocol(_) => {
            GatewayError::transient(TransientKind::Connection, err.to_string())
        }
        E::Database(db) => classify_database(db.as_ref()),
        E::ColumnNotFound(_)
        | E::ColumnIndexOutOfBounds { .. }
        | E::ColumnDecode { .. }
        | E::Decode(_)
        | E::TypeNotFound { .. }
        | E::RowNotFound => GatewayError::permanent(PermanentKind::SchemaMismatch, err.to_string()),
        E::Configuration(_) => GatewayError::permanent(PermanentKind::Configuration, err.to_string()),
        other => GatewayError::permanent(PermanentKind::Database, other.to_string()),
    }
}

fn classify_database(db: &dyn DatabaseError) -> GatewayError {
    let message = db.message().to_string();

    if let Some(mysql) = db.try_downcast_ref::<MySqlDatabaseError>() {
        match mysql.number() {
            1205 | 1213 => return GatewayError::transient(TransientKind::Deadlock, message),
            1040 | 1053 | 2006 | 2013 => return GatewayError::transient(TransientKind::Connection, message),
            1044 | 1045 | 1698 => return GatewayError::permanent(PermanentKind::Authentication, message),
            1054 | 1146 => return GatewayError::permanent(PermanentKind::SchemaMismatch, message),
            1064 => return GatewayError::permanent(PermanentKind::MalformedQuery, message),
            _ => {}
        }
    }

    let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
    match code.as_str() {
        // SQLSTATE serialization failure; SQLite BUSY, LOCKED and their extended codes
        "40001" | "5" | "6" | "261" | "517" | "262" => {
            return GatewayError::transient(TransientKind::Deadlock, message)
        }
        "08001" | "08004" | "08S01" => return GatewayError::transient(TransientKind::Connection, message),
        "28000" | "23" => return GatewayError::permanent(PermanentKind::Authentication, message),
        "42S02" | "42S22" => return GatewayError::permanent(PermanentKind::SchemaMismatch, message),
        "42000" => return GatewayError::permanent(PermanentKind::MalformedQuery, message),
        _ => {}
    }

    let lower = message.to_ascii_lowercase();
    if lower.contains("database is locked") || lower.contains("deadlock") {
        GatewayError::transient(TransientKind::Deadlock, message)
    } else if lower.contains("no such table") || lower.contains("no such column") {
        GatewayError::permanent(PermanentKind::SchemaMismatch, message)
    } else if lower.contains("syntax error") {
        GatewayError::permanent(PermanentKind::MalformedQuery, message)
    } else {
        GatewayError::permanent(PermanentKind::Database, message)
    }
}
