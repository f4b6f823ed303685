//! Operational metrics for the service
//!
//! Thread-safe counters over atomics; a point-in-time snapshot feeds the
//! `/stats` endpoint. Nothing here is billing data — tenant usage lives in
//! the aggregator.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Service-wide counters
#[derive(Debug, Default)]
pub struct CdnMetrics {
    requests_total: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    redirects: AtomicU64,
    conditional_not_modified: AtomicU64,
    range_responses: AtomicU64,
    bytes_to_client: AtomicU64,
    bytes_from_origin: AtomicU64,
    poisoned_deleted: AtomicU64,
    uncacheable_no_length: AtomicU64,
    cache_write_failures: AtomicU64,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub redirects: u64,
    pub conditional_not_modified: u64,
    pub range_responses: u64,
    pub bytes_to_client: u64,
    pub bytes_from_origin: u64,
    pub poisoned_deleted: u64,
    pub uncacheable_no_length: u64,
    pub cache_write_failures: u64,
}

impl CdnMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_redirect(&self) {
        self.redirects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_modified(&self) {
        self.conditional_not_modified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_range_response(&self) {
        self.range_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes_to_client(&self, bytes: u64) {
        self.bytes_to_client.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_bytes_from_origin(&self, bytes: u64) {
        self.bytes_from_origin.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_poisoned_delete(&self) {
        self.poisoned_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_uncacheable_no_length(&self) {
        self.uncacheable_no_length.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_write_failure(&self) {
        self.cache_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            redirects: self.redirects.load(Ordering::Relaxed),
            conditional_not_modified: self.conditional_not_modified.load(Ordering::Relaxed),
            range_responses: self.range_responses.load(Ordering::Relaxed),
            bytes_to_client: self.bytes_to_client.load(Ordering::Relaxed),
            bytes_from_origin: self.bytes_from_origin.load(Ordering::Relaxed),
            poisoned_deleted: self.poisoned_deleted.load(Ordering::Relaxed),
            uncacheable_no_length: self.uncacheable_no_length.load(Ordering::Relaxed),
            cache_write_failures: self.cache_write_failures.load(Ordering::Relaxed),
        }
    }
}
