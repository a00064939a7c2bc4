//! Metrics and observability utilities
//!
//! Prometheus-style metrics for the enrichment pipeline. Binaries that
//! expose metrics install an exporter; without one these calls are no-ops.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all NutriForge metrics
pub const METRICS_PREFIX: &str = "nutriforge";

/// Histogram buckets for HTTP request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.00,
];

/// Buckets for provider lookups, bounded above by the provider timeout
pub const PROVIDER_BUCKETS: &[f64] = &[
    0.100, 0.250, 0.500, 1.000, 2.000, 5.000, 10.00, 30.00,
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    describe_counter!(
        format!("{}_enrichment_items_total", METRICS_PREFIX),
        Unit::Count,
        "Enrichment items processed, by outcome"
    );

    describe_histogram!(
        format!("{}_provider_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Provider lookup latency in seconds"
    );

    describe_histogram!(
        format!("{}_quality_score", METRICS_PREFIX),
        Unit::Count,
        "Quality scores written after enrichment"
    );

    describe_counter!(
        format!("{}_retry_sweep_total", METRICS_PREFIX),
        Unit::Count,
        "Records touched by the retry sweep, by action"
    );

    describe_counter!(
        format!("{}_review_flags_total", METRICS_PREFIX),
        Unit::Count,
        "Review flags raised, by flag"
    );

    describe_gauge!(
        format!("{}_queue_depth", METRICS_PREFIX),
        Unit::Count,
        "Enrichment queue entries, by status"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record one processed enrichment item (`outcome`: success, no_match, error, timeout)
pub fn record_enrichment(provider: &str, outcome: &str, duration_secs: f64) {
    counter!(
        format!("{}_enrichment_items_total", METRICS_PREFIX),
        "provider" => provider.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_provider_duration_seconds", METRICS_PREFIX),
        "provider" => provider.to_string()
    )
    .record(duration_secs);
}

pub fn record_quality_score(score: i32) {
    histogram!(format!("{}_quality_score", METRICS_PREFIX)).record(score as f64);
}

pub fn record_sweep(reset: usize, flagged: usize) {
    counter!(
        format!("{}_retry_sweep_total", METRICS_PREFIX),
        "action" => "reset"
    )
    .increment(reset as u64);

    counter!(
        format!("{}_retry_sweep_total", METRICS_PREFIX),
        "action" => "flagged"
    )
    .increment(flagged as u64);
}

pub fn record_flag(flag: &str) {
    counter!(
        format!("{}_review_flags_total", METRICS_PREFIX),
        "flag" => flag.to_string()
    )
    .increment(1);
}

pub fn record_queue_depth(pending: u64, processing: u64) {
    gauge!(
        format!("{}_queue_depth", METRICS_PREFIX),
        "status" => "pending"
    )
    .set(pending as f64);

    gauge!(
        format!("{}_queue_depth", METRICS_PREFIX),
        "status" => "processing"
    )
    .set(processing as f64);
}
