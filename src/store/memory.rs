//! In-process key-value store
//!
//! Used by tests and by configurations without a `database-path`.

use crate::store::traits::{KeyValueStore, StoreError, StoreResult};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    counters: HashMap<String, i64>,
}

/// Key-value store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .map(|inner| inner.entries.values().filter(|e| e.is_live(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let mut inner = self.lock()?;
        match inner.entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                inner.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.lock()?.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    fn incr(&self, counter: &str) -> StoreResult<i64> {
        let mut inner = self.lock()?;
        let value = inner.counters.entry(counter.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    fn list_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let now = Instant::now();
        let inner = self.lock()?;
        let mut keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.lock()?.entries.remove(key);
        Ok(())
    }
}
