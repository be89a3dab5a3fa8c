use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Map of independently lockable per-key slots
///
/// Callers fetch the slot for a key and lock it for the duration of a
/// read-modify-write sequence. Distinct keys never contend beyond the brief
/// map lookup.
#[derive(Debug)]
pub struct KeyedLocks<T> {
    slots: Mutex<HashMap<String, Arc<Mutex<T>>>>,
}

impl<T> Default for KeyedLocks<T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> KeyedLocks<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the slot for `key`, creating it with `init` on first use
    pub fn slot(&self, key: &str, init: impl FnOnce() -> T) -> Arc<Mutex<T>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(init())))
            .clone()
    }

    /// Returns the slot for `key` if one exists
    pub fn existing(&self, key: &str) -> Option<Arc<Mutex<T>>> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(key).cloned()
    }

    /// Snapshot of all slots
    pub fn entries(&self) -> Vec<(String, Arc<Mutex<T>>)> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub fn remove(&self, key: &str) -> Option<Arc<Mutex<T>>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.remove(key)
    }
}

/// Locks a slot, recovering the value if a previous holder panicked
pub fn lock_slot<T>(slot: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}
