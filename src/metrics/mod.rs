//! Metrics sinks
//!
//! The engine reports counters, gauges and timers through `MetricsSink`:
//! - `TracingMetrics` emits them as `tracing` events
//! - `InMemoryMetrics` aggregates them for tests and end-of-run summaries

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

pub const PAGES_FETCHED: &str = "pages_fetched";
pub const PAGES_FAILED: &str = "pages_failed";
pub const URLS_SKIPPED: &str = "urls_skipped";
pub const FALLBACK_ATTEMPTS: &str = "fallback_attempts";
pub const DETECTIONS: &str = "detections";
pub const FRONTIER_SIZE: &str = "frontier_size";
pub const FETCH_LATENCY: &str = "fetch_latency";

pub trait MetricsSink: Send + Sync {
    fn counter(&self, name: &str, value: u64);
    fn gauge(&self, name: &str, value: f64);
    fn timer(&self, name: &str, elapsed: Duration);
}

/// Writes every observation as a trace-level event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn counter(&self, name: &str, value: u64) {
        tracing::trace!(metric = name, value, "counter");
    }

    fn gauge(&self, name: &str, value: f64) {
        tracing::trace!(metric = name, value, "gauge");
    }

    fn timer(&self, name: &str, elapsed: Duration) {
        tracing::trace!(metric = name, elapsed_ms = elapsed.as_millis() as u64, "timer");
    }
}

/// Aggregated timer observations
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimerStats {
    pub count: u64,
    pub total: Duration,
    pub max: Duration,
}

impl TimerStats {
    pub fn mean(&self) -> Option<Duration> {
        (self.count > 0).then(|| self.total / self.count as u32)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, f64>,
    pub timers: BTreeMap<String, TimerStats>,
}

impl MetricsSnapshot {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }
}

/// Keeps running totals in memory
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    inner: Mutex<MetricsSnapshot>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn counter_value(&self, name: &str) -> u64 {
        self.snapshot().counter(name)
    }
}

impl MetricsSink for InMemoryMetrics {
    fn counter(&self, name: &str, value: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *inner.counters.entry(name.to_string()).or_insert(0) += value;
    }

    fn gauge(&self, name: &str, value: f64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.gauges.insert(name.to_string(), value);
    }

    fn timer(&self, name: &str, elapsed: Duration) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let stats = inner.timers.entry(name.to_string()).or_default();
        stats.count += 1;
        stats.total += elapsed;
        stats.max = stats.max.max(elapsed);
    }
}
