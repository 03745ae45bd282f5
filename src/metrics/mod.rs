// Metrics module for Prometheus observability
// Author: kelexine (https://github.com/kelexine)

mod registry;

pub use registry::{
    gather_metrics,
    LOOKUPS_TOTAL,
    BYTES_TOTAL,
    STORE_FAILURES,
    RETRIES_TOTAL,
    GATEWAY_FALLBACKS,
    BLOB_HANDLES,
};

/// Helper to record worker lookup outcomes
pub fn record_hit(bytes: usize) {
    LOOKUPS_TOTAL.with_label_values(&["hit"]).inc();
    BYTES_TOTAL.inc_by(bytes as u64);
}

pub fn record_miss() {
    LOOKUPS_TOTAL.with_label_values(&["miss"]).inc();
}

pub fn record_fetched(bytes: usize) {
    BYTES_TOTAL.inc_by(bytes as u64);
}

pub fn record_lookup_error() {
    LOOKUPS_TOTAL.with_label_values(&["error"]).inc();
}

/// Helper to record store failures
pub fn record_store_failure(operation: &str) {
    STORE_FAILURES.with_label_values(&[operation]).inc();
}

pub fn record_retry(operation: &str) {
    RETRIES_TOTAL.with_label_values(&[operation]).inc();
}

/// Helper to record gateway degradations
pub fn record_fallback(reason: &str) {
    GATEWAY_FALLBACKS.with_label_values(&[reason]).inc();
}

pub fn update_blob_handles(count: usize) {
    BLOB_HANDLES.set(count as f64);
}
