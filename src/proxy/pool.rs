use crate::config::ProxyConfig;
use crate::policy::ProxyClass;
use crate::proxy::probe::ProxyProbe;
use crate::proxy::record::{ProxyProtocol, ProxyRecord, ProxyStatus};
use crate::store::{get_json, put_json, KeyValueStore};
use chrono::Utc;
use futures::future::join_all;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Settings for proxy validation
#[derive(Debug, Clone)]
pub struct ProxyPoolSettings {
    pub test_url: String,
    pub validation_timeout: Duration,
    pub validation_concurrency: usize,
}

impl Default for ProxyPoolSettings {
    fn default() -> Self {
        Self {
            test_url: "https://httpbin.org/ip".to_string(),
            validation_timeout: Duration::from_secs(10),
            validation_concurrency: 10,
        }
    }
}

impl From<&ProxyConfig> for ProxyPoolSettings {
    fn from(config: &ProxyConfig) -> Self {
        Self {
            test_url: config.test_url.clone(),
            validation_timeout: Duration::from_secs(config.validation_timeout_secs),
            validation_concurrency: config.validation_concurrency,
        }
    }
}

/// Filter for proxy selection
#[derive(Debug, Clone, Default)]
pub struct ProxyQuery {
    pub protocol: Option<ProxyProtocol>,
    pub country: Option<String>,
    /// Preferred class; other classes are used when none match
    pub class: Option<ProxyClass>,
    /// Key to avoid, used when rotating away from a proxy
    pub exclude: Option<String>,
}

/// Snapshot of pool health
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProxyPoolStats {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub unknown: usize,
    pub testing: usize,
    pub blocked: usize,
    pub average_success_rate: f64,
    pub average_response_time: Option<Duration>,
}

/// Outcome of a validation batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationSummary {
    pub checked: usize,
    pub active: usize,
    pub inactive: usize,
}

/// Set of proxies with weighted selection and health tracking
///
/// Selection copies candidates under the read lock and samples outside it;
/// all mutation happens under the write lock.
pub struct ProxyPool {
    proxies: RwLock<HashMap<String, ProxyRecord>>,
    probe: Arc<dyn ProxyProbe>,
    settings: ProxyPoolSettings,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl ProxyPool {
    pub fn new(probe: Arc<dyn ProxyProbe>, settings: ProxyPoolSettings) -> Self {
        Self {
            proxies: RwLock::new(HashMap::new()),
            probe,
            settings,
            store: None,
        }
    }

    /// Enables write-through persistence of records
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn store_key(proxy_key: &str) -> String {
        format!("proxy:{}", proxy_key)
    }

    pub fn settings(&self) -> &ProxyPoolSettings {
        &self.settings
    }

    /// Adds or replaces a proxy
    ///
    /// # Returns
    ///
    /// `true` if the key was not present before
    pub fn add_proxy(&self, record: ProxyRecord) -> bool {
        let key = record.key();
        self.persist(&record);
        let previous = self.write().insert(key.clone(), record);
        if previous.is_none() {
            tracing::debug!("Added proxy {}", key);
        }
        previous.is_none()
    }

    /// Removes a proxy by `host:port`; removing an unknown key is a no-op
    pub fn remove_proxy(&self, key: &str) -> Option<ProxyRecord> {
        let removed = self.write().remove(key);
        if removed.is_some() {
            self.unpersist(key);
        }
        removed
    }

    pub fn get(&self, key: &str) -> Option<ProxyRecord> {
        self.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Copies every record
    pub fn snapshot(&self) -> Vec<ProxyRecord> {
        let mut records: Vec<ProxyRecord> = self.read().values().cloned().collect();
        records.sort_by_key(|r| r.key());
        records
    }

    /// Picks an active proxy matching the protocol and country filters
    pub fn get_proxy(
        &self,
        protocol: Option<ProxyProtocol>,
        country: Option<&str>,
    ) -> Option<ProxyRecord> {
        self.select(&ProxyQuery {
            protocol,
            country: country.map(str::to_string),
            ..ProxyQuery::default()
        })
    }

    /// Weighted random selection among active proxies matching `query`
    pub fn select(&self, query: &ProxyQuery) -> Option<ProxyRecord> {
        self.select_with_rng(query, &mut rand::thread_rng())
    }

    pub fn select_with_rng<R: Rng + ?Sized>(
        &self,
        query: &ProxyQuery,
        rng: &mut R,
    ) -> Option<ProxyRecord> {
        let candidates: Vec<ProxyRecord> = self
            .read()
            .values()
            .filter(|r| r.is_active())
            .filter(|r| query.protocol.map_or(true, |p| r.protocol == p))
            .filter(|r| {
                query.country.as_deref().map_or(true, |c| {
                    r.country
                        .as_deref()
                        .is_some_and(|rc| rc.eq_ignore_ascii_case(c))
                })
            })
            .cloned()
            .collect();

        let candidates = narrow(candidates, |r| {
            query.class.map_or(true, |class| r.class == Some(class))
        });
        let candidates = narrow(candidates, |r| {
            query.exclude.as_deref().map_or(true, |key| r.key() != key)
        });

        weighted_choice(rng, &candidates).cloned()
    }

    /// Validates one proxy with a single test request
    ///
    /// A 200 response marks the proxy active and records its response time;
    /// anything else (including a timeout) marks it inactive. The success
    /// rate moves toward the outcome either way.
    pub async fn validate_proxy(&self, record: &ProxyRecord, test_url: &str) -> bool {
        let key = record.key();
        let timeout = self.settings.validation_timeout;
        let started = Instant::now();

        let outcome = tokio::time::timeout(timeout, self.probe.probe(record, test_url, timeout)).await;
        let elapsed = started.elapsed();

        let ok = match outcome {
            Ok(Ok(200)) => true,
            Ok(Ok(status)) => {
                tracing::debug!("Proxy {} answered {} during validation", key, status);
                false
            }
            Ok(Err(e)) => {
                tracing::debug!("Proxy {} failed validation: {}", key, e);
                false
            }
            Err(_) => {
                tracing::debug!("Proxy {} timed out after {:?}", key, timeout);
                false
            }
        };

        self.update(&key, |r| {
            r.observe(ok);
            r.last_checked = Some(Utc::now());
            if ok {
                r.status = ProxyStatus::Active;
                r.response_time = Some(elapsed);
            } else {
                r.status = ProxyStatus::Inactive;
            }
        });

        ok
    }

    /// Validates every proxy, at most `validation_concurrency` at a time
    ///
    /// Active proxies stay selectable until their own check finishes; the
    /// rest are marked `Testing` for the duration of the batch.
    pub async fn validate_all_proxies(&self) -> ValidationSummary {
        let records = self.snapshot();
        for record in records.iter().filter(|r| !r.is_active()) {
            self.update(&record.key(), |r| r.status = ProxyStatus::Testing);
        }

        let semaphore = Arc::new(Semaphore::new(self.settings.validation_concurrency.max(1)));
        let test_url = self.settings.test_url.clone();

        let checks = records.iter().map(|record| {
            let semaphore = semaphore.clone();
            let test_url = test_url.as_str();
            async move {
                let _permit = semaphore.acquire().await.ok()?;
                Some(self.validate_proxy(record, test_url).await)
            }
        });

        let outcomes = join_all(checks).await;
        let active = outcomes.iter().filter(|o| **o == Some(true)).count();
        let summary = ValidationSummary {
            checked: outcomes.iter().filter(|o| o.is_some()).count(),
            active,
            inactive: outcomes.iter().filter(|o| **o == Some(false)).count(),
        };

        tracing::info!(
            "Validated {} proxies: {} active, {} inactive",
            summary.checked,
            summary.active,
            summary.inactive
        );
        summary
    }

    /// Removes proxies that are inactive and have not been checked within `max_age`
    ///
    /// # Returns
    ///
    /// Number of proxies removed
    pub fn cleanup_inactive_proxies(&self, max_age: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));

        let stale: Vec<String> = self
            .read()
            .values()
            .filter(|r| r.status == ProxyStatus::Inactive)
            .filter(|r| match (r.last_checked, cutoff) {
                (None, _) => true,
                (Some(checked), Some(cutoff)) => checked < cutoff,
                (Some(_), None) => false,
            })
            .map(|r| r.key())
            .collect();

        for key in &stale {
            self.remove_proxy(key);
        }

        if !stale.is_empty() {
            tracing::info!("Removed {} inactive proxies", stale.len());
        }
        stale.len()
    }

    /// Folds a crawl outcome observed through a proxy into its success rate
    pub fn report_outcome(&self, key: &str, success: bool) {
        self.update(key, |r| r.observe(success));
    }

    /// Takes a proxy out of rotation after the target blocked it
    pub fn mark_blocked(&self, key: &str) {
        self.update(key, |r| {
            r.observe(false);
            r.status = ProxyStatus::Blocked;
        });
    }

    pub fn get_stats(&self) -> ProxyPoolStats {
        let proxies = self.read();
        let mut stats = ProxyPoolStats {
            total: proxies.len(),
            ..ProxyPoolStats::default()
        };

        let mut rate_sum = 0.0;
        let mut response_sum = Duration::ZERO;
        let mut response_count = 0u32;

        for record in proxies.values() {
            match record.status {
                ProxyStatus::Active => stats.active += 1,
                ProxyStatus::Inactive => stats.inactive += 1,
                ProxyStatus::Unknown => stats.unknown += 1,
                ProxyStatus::Testing => stats.testing += 1,
                ProxyStatus::Blocked => stats.blocked += 1,
            }
            rate_sum += record.success_rate;
            if let (true, Some(rt)) = (record.is_active(), record.response_time) {
                response_sum += rt;
                response_count += 1;
            }
        }

        if stats.total > 0 {
            stats.average_success_rate = rate_sum / stats.total as f64;
        }
        if response_count > 0 {
            stats.average_response_time = Some(response_sum / response_count);
        }
        stats
    }

    /// Loads every persisted record into the pool
    ///
    /// # Returns
    ///
    /// Number of records loaded
    pub fn load_from_store(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };

        let keys = match store.list_keys("proxy:") {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("Failed to list stored proxies: {}", e);
                return 0;
            }
        };

        let mut loaded = 0;
        for key in keys {
            match get_json::<ProxyRecord>(store.as_ref(), &key) {
                Ok(Some(record)) => {
                    self.write().insert(record.key(), record);
                    loaded += 1;
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping unreadable proxy entry {}: {}", key, e),
            }
        }
        loaded
    }

    fn update(&self, key: &str, f: impl FnOnce(&mut ProxyRecord)) {
        let updated = {
            let mut proxies = self.write();
            proxies.get_mut(key).map(|record| {
                f(record);
                record.clone()
            })
        };
        if let Some(record) = updated {
            self.persist(&record);
        }
    }

    fn persist(&self, record: &ProxyRecord) {
        if let Some(store) = &self.store {
            if let Err(e) = put_json(store.as_ref(), &Self::store_key(&record.key()), record, None) {
                tracing::warn!("Failed to persist proxy {}: {}", record.key(), e);
            }
        }
    }

    fn unpersist(&self, key: &str) {
        if let Some(store) = &self.store {
            if let Err(e) = store.delete(&Self::store_key(key)) {
                tracing::warn!("Failed to delete stored proxy {}: {}", key, e);
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ProxyRecord>> {
        self.proxies.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ProxyRecord>> {
        self.proxies.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Keeps the records matching `pred`, unless none do
fn narrow(records: Vec<ProxyRecord>, pred: impl Fn(&ProxyRecord) -> bool) -> Vec<ProxyRecord> {
    if records.iter().any(&pred) {
        records.into_iter().filter(|r| pred(r)).collect()
    } else {
        records
    }
}

/// Draws one record with probability proportional to its weight
fn weighted_choice<'a, R: Rng + ?Sized>(
    rng: &mut R,
    candidates: &'a [ProxyRecord],
) -> Option<&'a ProxyRecord> {
    let total: f64 = candidates.iter().map(ProxyRecord::weight).sum();
    if candidates.is_empty() || total <= 0.0 {
        return None;
    }

    let mut target = rng.gen_range(0.0..total);
    for record in candidates {
        let weight = record.weight();
        if target < weight {
            return Some(record);
        }
        target -= weight;
    }
    candidates.last()
}
