//! Metrics collection for caches and menu filtering.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counters for one cache store.
///
/// Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct CacheMetrics {
    /// Fetches answered from a fresh cache entry.
    pub hits: Arc<AtomicU64>,
    /// Fetches that needed the transport (or joined a request that did).
    pub misses: Arc<AtomicU64>,
    /// Fetches that joined an already in-flight request.
    pub dedup_joins: Arc<AtomicU64>,
    /// Transport invocations started.
    pub transport_calls: Arc<AtomicU64>,
    /// In-flight requests cancelled because a newer one superseded them.
    pub cancellations: Arc<AtomicU64>,
    /// Transport invocations that settled with an error.
    pub failures: Arc<AtomicU64>,
    /// Slowest fetch per duration bucket.
    pub fetch_durations: Arc<DashMap<&'static str, Duration>>,
}

impl CacheMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cache hit.
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache miss.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a caller joining an in-flight request.
    pub fn record_dedup_join(&self) {
        self.dedup_joins.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a transport invocation.
    pub fn record_transport_call(&self) {
        self.transport_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a superseded request being cancelled.
    pub fn record_cancellation(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a settled fetch and how long it took.
    pub fn record_settled(&self, duration: Duration, ok: bool) {
        if !ok {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.fetch_durations
            .entry(duration_to_bucket(duration))
            .and_modify(|existing| {
                if duration > *existing {
                    *existing = duration;
                }
            })
            .or_insert(duration);
    }

    /// Get cache hit ratio.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            dedup_joins: self.dedup_joins.load(Ordering::Relaxed),
            transport_calls: self.transport_calls.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            hit_ratio: self.hit_ratio(),
            slowest_by_bucket: self
                .fetch_durations
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.dedup_joins.store(0, Ordering::Relaxed);
        self.transport_calls.store(0, Ordering::Relaxed);
        self.cancellations.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.fetch_durations.clear();
    }
}

/// Summary of cache metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub dedup_joins: u64,
    pub transport_calls: u64,
    pub cancellations: u64,
    pub failures: u64,
    pub hit_ratio: f64,
    pub slowest_by_bucket: HashMap<&'static str, Duration>,
}

/// Counters for menu visibility checks.
#[derive(Debug, Clone, Default)]
pub struct FilterMetrics {
    checks: Arc<AtomicU64>,
    denied: Arc<AtomicU64>,
}

impl FilterMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one visibility decision.
    pub fn record_check(&self, visible: bool) {
        self.checks.fetch_add(1, Ordering::Relaxed);
        if !visible {
            self.denied.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> FilterMetricsSnapshot {
        FilterMetricsSnapshot {
            checks: self.checks.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
        }
    }
}

/// Summary of filter metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterMetricsSnapshot {
    pub checks: u64,
    pub denied: u64,
}

fn duration_to_bucket(duration: Duration) -> &'static str {
    match duration.as_millis() {
        0..=9 => "0-9ms",
        10..=99 => "10-99ms",
        100..=999 => "100-999ms",
        1000..=9999 => "1-9s",
        _ => "10s+",
    }
}
