// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for collection-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `collection_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for size gauges and counters
//!
//! # Labels
//! - `collection`: configured collection name
//! - `operation`: sync, publish, update, delete, materialize, cleanup
//! - `status` / `outcome`: success, error, stale, fresh, fallback, busy

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record an engine operation outcome
pub fn record_operation(collection: &str, operation: &str, status: &str) {
    counter!(
        "collection_sync_operations_total",
        "collection" => collection.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(collection: &str, operation: &str, duration: Duration) {
    histogram!(
        "collection_sync_operation_seconds",
        "collection" => collection.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record how a sync call was resolved (stale, fresh, fallback, busy, exhausted)
pub fn record_sync(collection: &str, mode: &str, outcome: &str) {
    counter!(
        "collection_sync_syncs_total",
        "collection" => collection.to_string(),
        "mode" => mode.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record records received from the remote store
pub fn record_fetched(collection: &str, count: usize) {
    counter!(
        "collection_sync_records_fetched_total",
        "collection" => collection.to_string()
    )
    .increment(count as u64);
}

// ═══════════════════════════════════════════════════════════════════════════
// ERROR TRACKING
// ═══════════════════════════════════════════════════════════════════════════

/// Record an error with category for alerting
pub fn record_error(collection: &str, operation: &str, error_type: &str) {
    counter!(
        "collection_sync_errors_total",
        "collection" => collection.to_string(),
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record a corrupt persisted value that was discarded
pub fn record_corrupt_cache(collection: &str, table: &str) {
    counter!(
        "collection_sync_corrupt_cache_total",
        "collection" => collection.to_string(),
        "table" => table.to_string()
    )
    .increment(1);
}

/// Record a collaborator call that hit its deadline
pub fn record_timeout(boundary: &str, operation: &str) {
    counter!(
        "collection_sync_timeouts_total",
        "boundary" => boundary.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// IMAGE CACHE
// ═══════════════════════════════════════════════════════════════════════════

/// Record an image table lookup (hit, miss, stale)
pub fn record_image_lookup(collection: &str, result: &str) {
    counter!(
        "collection_sync_image_lookups_total",
        "collection" => collection.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

/// Record a completed download
pub fn record_download(collection: &str, bytes: u64) {
    counter!(
        "collection_sync_downloads_total",
        "collection" => collection.to_string()
    )
    .increment(1);
    counter!(
        "collection_sync_downloaded_bytes_total",
        "collection" => collection.to_string()
    )
    .increment(bytes);
}

/// Record evictions of records or images
pub fn record_eviction(collection: &str, kind: &str, reason: &str, count: usize, bytes: u64) {
    counter!(
        "collection_sync_evictions_total",
        "collection" => collection.to_string(),
        "kind" => kind.to_string(),
        "reason" => reason.to_string()
    )
    .increment(count as u64);
    if bytes > 0 {
        counter!(
            "collection_sync_evicted_bytes_total",
            "collection" => collection.to_string(),
            "kind" => kind.to_string()
        )
        .increment(bytes);
    }
}

/// Set current materialized image bytes
pub fn set_image_cache_bytes(collection: &str, bytes: u64) {
    gauge!(
        "collection_sync_image_cache_bytes",
        "collection" => collection.to_string()
    )
    .set(bytes as f64);
}

/// Set current materialized image count
pub fn set_image_cache_entries(collection: &str, count: usize) {
    gauge!(
        "collection_sync_image_cache_entries",
        "collection" => collection.to_string()
    )
    .set(count as f64);
}

/// Set cached record count for the last written bucket
pub fn set_cached_records(collection: &str, count: usize) {
    gauge!(
        "collection_sync_cached_records",
        "collection" => collection.to_string()
    )
    .set(count as f64);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    collection: String,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(collection: &str, operation: &'static str) -> Self {
        Self {
            collection: collection.to_string(),
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(&self.collection, self.operation, self.start.elapsed());
    }
}
