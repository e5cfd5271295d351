// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local snapshot history.
//!
//! [`SqlSnapshotStore`] is the durable store (SQLite file by default, MySQL
//! accepted). [`InMemorySnapshotStore`] backs tests and embedders that keep
//! history elsewhere.

pub mod traits;
pub mod memory;
pub mod sql;

pub use memory::InMemorySnapshotStore;
pub use sql::SqlSnapshotStore;
pub use traits::{PurgeReport, SnapshotStore, StorageError, WriteMode};
