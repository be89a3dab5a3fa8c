//! Store traits and error types
//!
//! This module defines the key-value interface that domain policies, proxy
//! records and learned fallback preferences are persisted through.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Counter '{0}' holds a non-integer value")]
    NotACounter(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Key-value backend with per-entry expiry
///
/// Implementations must be safe to share between tasks. Expired entries are
/// never returned by `get` or `list_keys`.
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Writes `value` under `key`, replacing any previous value
    ///
    /// # Arguments
    ///
    /// * `key` - The entry key
    /// * `value` - Raw bytes to store
    /// * `ttl` - Lifetime of the entry; `None` keeps it until deleted
    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()>;

    /// Atomically increments an integer counter and returns the new value
    fn incr(&self, counter: &str) -> StoreResult<i64>;

    /// Lists all live keys starting with `prefix`
    fn list_keys(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Removes an entry; deleting a missing key is not an error
    fn delete(&self, key: &str) -> StoreResult<()>;
}

/// Serializes `value` as JSON and writes it under `key`
pub fn put_json<T: serde::Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> StoreResult<()> {
    let bytes = serde_json::to_vec(value)?;
    store.set(key, &bytes, ttl)
}

/// Reads and deserializes a JSON value stored under `key`
pub fn get_json<T: serde::de::DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> StoreResult<Option<T>> {
    match store.get(key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}
