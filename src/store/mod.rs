//! Store module for persisting adaptive state
//!
//! This module handles all persistence for the resilience core, including:
//! - The `KeyValueStore` interface with per-entry TTL
//! - SQLite and in-memory backends
//! - Per-key lock slots used to serialize read-modify-write sequences

mod keyed;
mod memory;
mod schema;
mod sqlite;
mod traits;

pub use keyed::{lock_slot, KeyedLocks};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{get_json, put_json, KeyValueStore, StoreError, StoreResult};

use std::path::Path;
use std::sync::Arc;

/// Opens the store selected by configuration
///
/// # Arguments
///
/// * `database_path` - SQLite file to use; `None` selects an in-memory store
///
/// # Returns
///
/// * `Ok(Arc<dyn KeyValueStore>)` - Ready-to-share store
/// * `Err(StoreError)` - The database could not be opened
pub fn open_store(database_path: Option<&Path>) -> StoreResult<Arc<dyn KeyValueStore>> {
    match database_path {
        Some(path) => {
            tracing::info!("Opening store at {}", path.display());
            Ok(Arc::new(SqliteStore::open(path)?))
        }
        None => {
            tracing::debug!("No database path configured, using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        delay: f64,
    }

    #[test]
    fn test_json_helpers_roundtrip() {
        let store = MemoryStore::new();
        let sample = Sample {
            name: "a.com".to_string(),
            delay: 4.0,
        };
        put_json(&store, "sample", &sample, None).unwrap();

        let loaded: Option<Sample> = get_json(&store, "sample").unwrap();
        assert_eq!(loaded, Some(sample));

        let missing: Option<Sample> = get_json(&store, "nothing").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_open_store_selects_backend() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.db");

        let sqlite = open_store(Some(&path)).unwrap();
        sqlite.set("k", b"v", None).unwrap();
        assert!(path.exists());

        let memory = open_store(None).unwrap();
        assert_eq!(memory.get("k").unwrap(), None);
    }
}
