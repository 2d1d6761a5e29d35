//! Prometheus metrics for sync-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Counter for HTTP requests by method and status.
pub static HTTP_REQUESTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sync_http_requests_total",
        "Total number of HTTP requests",
        &["method", "status"]
    )
    .expect("Failed to register HTTP_REQUESTS")
});

/// Histogram for provider round-trip duration by operation.
pub static PROVIDER_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "sync_provider_request_duration_seconds",
        "Provider request duration in seconds",
        &["operation"],
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("Failed to register PROVIDER_REQUEST_DURATION")
});

/// Counter for provider failures by operation and error code.
pub static PROVIDER_ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sync_provider_errors_total",
        "Total number of provider errors",
        &["operation", "code"]
    )
    .expect("Failed to register PROVIDER_ERRORS")
});

/// Histogram for store query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "sync_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for per-credential sync passes by outcome.
pub static SYNC_RUNS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sync_credential_runs_total",
        "Total number of credential sync passes",
        &["status"]
    )
    .expect("Failed to register SYNC_RUNS")
});

/// Counter for applied changelog entries by kind.
pub static SYNC_ENTRIES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sync_entries_total",
        "Total number of changelog entries applied",
        &["kind"]
    )
    .expect("Failed to register SYNC_ENTRIES")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&HTTP_REQUESTS);
    Lazy::force(&PROVIDER_REQUEST_DURATION);
    Lazy::force(&PROVIDER_ERRORS);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&SYNC_RUNS);
    Lazy::force(&SYNC_ENTRIES);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn record_http_request(method: &str, status: &str) {
    HTTP_REQUESTS.with_label_values(&[method, status]).inc();
}

pub fn record_provider_request(operation: &str, duration_secs: f64) {
    PROVIDER_REQUEST_DURATION
        .with_label_values(&[operation])
        .observe(duration_secs);
}

pub fn record_provider_error(operation: &str, code: &str) {
    PROVIDER_ERRORS.with_label_values(&[operation, code]).inc();
}

pub fn record_sync_run(status: &str) {
    SYNC_RUNS.with_label_values(&[status]).inc();
}

pub fn record_sync_entries(added: u64, modified: u64, removed: u64) {
    SYNC_ENTRIES.with_label_values(&["added"]).inc_by(added as f64);
    SYNC_ENTRIES
        .with_label_values(&["modified"])
        .inc_by(modified as f64);
    SYNC_ENTRIES
        .with_label_values(&["removed"])
        .inc_by(removed as f64);
}
