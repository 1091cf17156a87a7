//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all YaMDb metrics
pub const METRICS_PREFIX: &str = "yamdb";

/// SLO-aligned histogram buckets for request latency (in seconds)
/// Targets: P50 < 50ms, P99 < 150ms
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001,  // 1ms
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms - P50 target
    0.075,  // 75ms
    0.100,  // 100ms
    0.150,  // 150ms - P99 target
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
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

    // Identity metrics
    describe_counter!(
        format!("{}_signups_total", METRICS_PREFIX),
        Unit::Count,
        "Signup requests by outcome"
    );

    describe_counter!(
        format!("{}_token_exchanges_total", METRICS_PREFIX),
        Unit::Count,
        "Confirmation code exchanges by outcome"
    );

    // Review metrics
    describe_counter!(
        format!("{}_reviews_created_total", METRICS_PREFIX),
        Unit::Count,
        "Total reviews created"
    );

    describe_counter!(
        format!("{}_integrity_conflicts_total", METRICS_PREFIX),
        Unit::Count,
        "Writes rejected by a uniqueness rule"
    );

    // Access metrics
    describe_counter!(
        format!("{}_access_denied_total", METRICS_PREFIX),
        Unit::Count,
        "Requests rejected by a permission policy"
    );

    // Notification metrics
    describe_counter!(
        format!("{}_notifications_total", METRICS_PREFIX),
        Unit::Count,
        "Outbound notifications by backend and outcome"
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

/// Record a signup attempt (`created`, `resent`, `conflict`, `invalid`)
pub fn record_signup(outcome: &'static str) {
    counter!(
        format!("{}_signups_total", METRICS_PREFIX),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a code exchange (`issued`, `rejected`, `unknown_user`)
pub fn record_token_exchange(outcome: &'static str) {
    counter!(
        format!("{}_token_exchanges_total", METRICS_PREFIX),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_review_created() {
    counter!(format!("{}_reviews_created_total", METRICS_PREFIX)).increment(1);
}

/// Record a uniqueness rejection (`review`, `identity`, `slug`, `title`)
pub fn record_conflict(kind: &'static str) {
    counter!(
        format!("{}_integrity_conflicts_total", METRICS_PREFIX),
        "kind" => kind
    )
    .increment(1);
}

pub fn record_access_denied(policy: &'static str, reason: &'static str) {
    counter!(
        format!("{}_access_denied_total", METRICS_PREFIX),
        "policy" => policy,
        "reason" => reason
    )
    .increment(1);
}

pub fn record_notification(backend: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_notifications_total", METRICS_PREFIX),
        "backend" => backend.to_string(),
        "status" => status
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets() {
        // Verify buckets are sorted and contain SLO targets
        let mut prev = 0.0;
        for &bucket in LATENCY_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }

        assert!(LATENCY_BUCKETS.contains(&0.050));
        assert!(LATENCY_BUCKETS.contains(&0.150));
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed; calls must be no-ops
        let metrics = RequestMetrics::start("GET", "/api/v1/titles/");
        metrics.finish(200);
        record_signup("created");
        record_access_denied("admin_only", "forbidden");
        record_notification("console", true);
    }
}
