//! Shared sqlx `Any` driver plumbing.
//!
//! ## sqlx Any Driver Quirks
//!
//! The `Any` driver hands MySQL `TEXT`/`LONGTEXT` columns back as BLOBs, so
//! text is read as `String` first and as `Vec<u8>` second.

use std::sync::Once;

use sqlx::any::AnyRow;
use sqlx::Row;

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

pub(crate) fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

/// Nullable text column, tolerant of the BLOB mapping.
pub(crate) fn opt_text(row: &AnyRow, column: &str) -> Result<Option<String>, sqlx::Error> {
    match row.try_get::<Option<String>, _>(column) {
        Ok(value) => Ok(value),
        Err(_) => {
            let bytes: Option<Vec<u8>> = row.try_get(column)?;
            bytes
                .map(|b| {
                    String::from_utf8(b).map_err(|e| sqlx::Error::ColumnDecode {
                        index: column.to_string(),
                        source: Box::new(e),
                    })
                })
                .transpose()
        }
    }
}

/// Non-null text column.
pub(crate) fn text(row: &AnyRow, column: &str) -> Result<String, sqlx::Error> {
    opt_text(row, column)?.ok_or_else(|| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: "unexpected NULL".into(),
    })
}
