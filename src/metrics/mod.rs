//! Metrics module
//!
//! Prometheus counters and histograms for gateway requests and the S3 calls
//! made on their behalf.

pub mod server;

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    HistogramVec,
};

lazy_static! {
    // Gateway request metrics
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "gateway_requests_total",
        "Gateway requests by route and status",
        &["route", "status"]
    ).unwrap();

    pub static ref REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "gateway_request_duration_seconds",
        "Gateway request duration in seconds",
        &["route"],
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0]
    ).unwrap();

    // S3 transport metrics
    pub static ref S3_CALLS_TOTAL: CounterVec = register_counter_vec!(
        "gateway_s3_calls_total",
        "S3 calls by operation and response status",
        &["operation", "status"]
    ).unwrap();

    pub static ref S3_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "gateway_s3_call_duration_seconds",
        "S3 call duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    ).unwrap();

    // Limits and integrity
    pub static ref RATE_LIMITED_TOTAL: Counter = register_counter!(
        "gateway_rate_limited_total",
        "Requests rejected by the usage limiter"
    ).unwrap();

    pub static ref INTEGRITY_FAILURES_TOTAL: Counter = register_counter!(
        "gateway_integrity_failures_total",
        "Uploads rejected for size or SHA-256 mismatch"
    ).unwrap();
}

/// Record a completed gateway request
pub fn record_request(route: &str, status: u16, duration_secs: f64) {
    REQUESTS_TOTAL
        .with_label_values(&[route, &status.to_string()])
        .inc();
    REQUEST_DURATION
        .with_label_values(&[route])
        .observe(duration_secs);
}

/// Record one S3 call. `status` is the HTTP status, or `error` when no response arrived.
pub fn record_s3_call(operation: &str, status: &str, duration_secs: f64) {
    S3_CALLS_TOTAL.with_label_values(&[operation, status]).inc();
    S3_CALL_DURATION
        .with_label_values(&[operation])
        .observe(duration_secs);
}

pub fn record_rate_limited() {
    RATE_LIMITED_TOTAL.inc();
}

pub fn record_integrity_failure() {
    INTEGRITY_FAILURES_TOTAL.inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_request() {
        let before = REQUESTS_TOTAL
            .with_label_values(&["metrics_test_route", "200"])
            .get();
        record_request("metrics_test_route", 200, 0.01);
        let after = REQUESTS_TOTAL
            .with_label_values(&["metrics_test_route", "200"])
            .get();
        assert_eq!(after - before, 1.0);
    }

    #[test]
    fn test_record_s3_call() {
        record_s3_call("metrics_test_op", "error", 0.2);
        assert!(
            S3_CALLS_TOTAL
                .with_label_values(&["metrics_test_op", "error"])
                .get()
                >= 1.0
        );
    }

    #[test]
    fn test_record_counters() {
        let limited = RATE_LIMITED_TOTAL.get();
        record_rate_limited();
        assert!(RATE_LIMITED_TOTAL.get() > limited);

        let failures = INTEGRITY_FAILURES_TOTAL.get();
        record_integrity_failure();
        assert!(INTEGRITY_FAILURES_TOTAL.get() > failures);
    }
}
