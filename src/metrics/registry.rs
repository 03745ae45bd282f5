// Prometheus metrics registry and collectors
// Author: kelexine (https://github.com/kelexine)

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Gauge, IntCounter, Opts, Registry, TextEncoder, Encoder,
    register_counter_vec_with_registry, register_gauge_with_registry,
    register_int_counter_with_registry,
};

lazy_static! {
    /// Crate-local Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // LOOKUP METRICS
    // ============================================================================

    /// Worker lookups by outcome
    pub static ref LOOKUPS_TOTAL: CounterVec = register_counter_vec_with_registry!(
        Opts::new("imgcache_lookups_total", "Total image lookups handled by the cache worker"),
        &["outcome"], // outcome: hit, miss, error
        REGISTRY
    ).unwrap();

    /// Payload bytes delivered to callers
    pub static ref BYTES_TOTAL: IntCounter = register_int_counter_with_registry!(
        Opts::new("imgcache_bytes_total", "Total image bytes served by the cache worker"),
        REGISTRY
    ).unwrap();

    // ============================================================================
    // STORE METRICS
    // ============================================================================

    /// Store operations that failed
    pub static ref STORE_FAILURES: CounterVec = register_counter_vec_with_registry!(
        Opts::new("imgcache_store_failures_total", "Total failed persistent store operations"),
        &["operation"], // operation: open, get, put, delete, reset
        REGISTRY
    ).unwrap();

    /// Retried operations
    pub static ref RETRIES_TOTAL: CounterVec = register_counter_vec_with_registry!(
        Opts::new("imgcache_retries_total", "Total retry attempts"),
        &["operation"],
        REGISTRY
    ).unwrap();

    // ============================================================================
    // GATEWAY METRICS
    // ============================================================================

    /// Requests answered with the original URL instead of a cached payload
    pub static ref GATEWAY_FALLBACKS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("imgcache_gateway_fallbacks_total", "Total client requests degraded to the original URL"),
        &["reason"], // reason: sticky_flag, timeout, worker_error, no_payload, mint_error
        REGISTRY
    ).unwrap();

    /// Live blob handles
    pub static ref BLOB_HANDLES: Gauge = register_gauge_with_registry!(
        Opts::new("imgcache_blob_handles", "Number of live blob handles"),
        REGISTRY
    ).unwrap();
}

/// Gather all metrics and return as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
