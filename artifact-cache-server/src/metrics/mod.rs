//! Prometheus Metrics for the artifact cache
//!
//! - Lookups by category, tier and result
//! - Operation latency
//! - Evictions by tier and reason
//! - Tier residency (entries and bytes)
//! - HTTP requests

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder, register_histogram_vec,
    register_int_counter_vec, register_int_gauge_vec,
};

lazy_static! {
    // ============================================================================
    // Cache Metrics
    // ============================================================================

    /// Lookups by category, serving tier (memory, disk, none) and result
    pub static ref CACHE_LOOKUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "artifact_cache_lookups_total",
        "Total number of cache lookups by category, tier and result",
        &["category", "tier", "result"]
    ).unwrap();

    /// Cache operation latency in seconds
    pub static ref CACHE_OP_DURATION: HistogramVec = register_histogram_vec!(
        "artifact_cache_operation_duration_seconds",
        "Cache operation latency in seconds",
        &["operation"],
        vec![0.00001, 0.0001, 0.001, 0.01, 0.1, 1.0, 10.0]
    ).unwrap();

    /// Entries removed by tier and reason (lru, expired, size_cap, cleared)
    pub static ref CACHE_EVICTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "artifact_cache_evictions_total",
        "Total number of entries removed by tier and reason",
        &["tier", "reason"]
    ).unwrap();

    /// Disk writes by status (success, retry, failed)
    pub static ref CACHE_DISK_WRITES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "artifact_cache_disk_writes_total",
        "Total number of disk tier writes by status",
        &["status"]
    ).unwrap();

    /// Resident entries per tier
    pub static ref CACHE_ENTRIES: IntGaugeVec = register_int_gauge_vec!(
        "artifact_cache_entries",
        "Current number of entries per tier",
        &["tier"]
    ).unwrap();

    /// Stored bytes per tier
    pub static ref CACHE_BYTES: IntGaugeVec = register_int_gauge_vec!(
        "artifact_cache_bytes",
        "Current bytes stored per tier",
        &["tier"]
    ).unwrap();

    // ============================================================================
    // HTTP Metrics
    // ============================================================================

    /// Total HTTP requests
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "artifact_cache_http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    ).unwrap();

    /// HTTP request duration
    pub static ref HTTP_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "artifact_cache_http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.0001, 0.001, 0.01, 0.1, 1.0]
    ).unwrap();
}

/// Encode all metrics in Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record a lookup and its latency
pub fn record_lookup(category: &str, tier: &str, result: &str, duration_secs: f64) {
    CACHE_LOOKUPS_TOTAL
        .with_label_values(&[category, tier, result])
        .inc();
    CACHE_OP_DURATION
        .with_label_values(&["get"])
        .observe(duration_secs);
}

/// Record a non-lookup operation latency
pub fn record_op(operation: &str, duration_secs: f64) {
    CACHE_OP_DURATION
        .with_label_values(&[operation])
        .observe(duration_secs);
}

/// Record removed entries
pub fn record_evictions(tier: &str, reason: &str, count: u64) {
    if count > 0 {
        CACHE_EVICTIONS_TOTAL
            .with_label_values(&[tier, reason])
            .inc_by(count);
    }
}

/// Record a disk write attempt outcome
pub fn record_disk_write(status: &str) {
    CACHE_DISK_WRITES_TOTAL.with_label_values(&[status]).inc();
}

/// Update tier residency gauges
pub fn update_tier_usage(tier: &str, entries: usize, bytes: u64) {
    CACHE_ENTRIES.with_label_values(&[tier]).set(entries as i64);
    CACHE_BYTES.with_label_values(&[tier]).set(bytes as i64);
}

/// Record HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION
        .with_label_values(&[method, path])
        .observe(duration_secs);
}
