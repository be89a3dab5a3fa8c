//! Per-domain fetch gate
//!
//! At most one URL per domain is being fetched or retried at a time, and
//! consecutive turns are spaced by the crawl delay. Different domains never
//! wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;

/// Hands out exclusive, spaced access to each domain
#[derive(Debug, Default)]
pub struct DomainGate {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<Option<Instant>>>>>,
}

/// Exclusive access to one domain; records the fetch time when dropped
#[derive(Debug)]
pub struct GatePermit {
    last_fetch: OwnedMutexGuard<Option<Instant>>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        *self.last_fetch = Some(Instant::now());
    }
}

impl DomainGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the domain's turn
    ///
    /// `spacing` is evaluated once the domain is free, so it sees delay
    /// changes made by the previous fetch.
    pub async fn acquire(&self, domain: &str, spacing: impl FnOnce() -> Duration) -> GatePermit {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots
                .entry(domain.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
                .clone()
        };

        let last_fetch = slot.lock_owned().await;
        if let Some(last) = *last_fetch {
            let ready_at = last + spacing();
            if ready_at > Instant::now() {
                tracing::trace!(
                    "Waiting {:?} before next fetch to {}",
                    ready_at - Instant::now(),
                    domain
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }

        GatePermit { last_fetch }
    }

    /// Number of domains seen so far
    pub fn domains(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_fetch_is_immediate() {
        let gate = DomainGate::new();
        let start = Instant::now();
        drop(gate.acquire("a.com", || Duration::from_secs(5)).await);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_domain_is_spaced() {
        let gate = DomainGate::new();
        let start = Instant::now();

        drop(gate.acquire("a.com", || Duration::from_secs(5)).await);
        drop(gate.acquire("a.com", || Duration::from_secs(5)).await);
        assert!(start.elapsed() >= Duration::from_secs(5));

        drop(gate.acquire("a.com", || Duration::from_secs(2)).await);
        assert!(start.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_domains_are_independent() {
        let gate = DomainGate::new();
        let start = Instant::now();

        drop(gate.acquire("a.com", || Duration::from_secs(5)).await);
        drop(gate.acquire("b.com", || Duration::from_secs(5)).await);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(gate.domains(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_holder_per_domain() {
        let gate = Arc::new(DomainGate::new());
        let permit = gate.acquire("a.com", || Duration::ZERO).await;

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                drop(gate.acquire("a.com", || Duration::ZERO).await);
            })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(permit);
        waiter.await.unwrap();
    }
}
