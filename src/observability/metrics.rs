//! Metrics collection and exposition.
//!
//! # Metrics
//! - `throttle_calls_total` (counter): calls by throttle and admission (started/queued)
//! - `throttle_running` (gauge): outstanding calls per throttle
//! - `retry_attempts_total` (counter): attempts after the first, by operation
//! - `retry_exhausted_total` (counter): invocations that ran out of attempts
//! - `router_faults_total` (counter): handler faults by trust and bailout
//! - `http_requests_total` (counter) / `http_request_duration_seconds` (histogram)
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so the library stays
//!   usable without the exporter
//! - Labels use the diagnostic names given to wrapped operations

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a throttle admission decision.
pub fn record_throttle_call(throttle: &str, queued: bool) {
    let admission = if queued { "queued" } else { "started" };
    metrics::counter!(
        "throttle_calls_total",
        "throttle" => throttle.to_string(),
        "admission" => admission
    )
    .increment(1);
}

/// Record the current number of outstanding calls of a throttle.
pub fn record_throttle_running(throttle: &str, running: usize) {
    metrics::gauge!("throttle_running", "throttle" => throttle.to_string()).set(running as f64);
}

/// Record a retry attempt (attempts after the first).
pub fn record_retry_attempt(operation: &str) {
    metrics::counter!("retry_attempts_total", "operation" => operation.to_string()).increment(1);
}

/// Record an invocation that failed on every attempt.
pub fn record_retry_exhausted(operation: &str) {
    metrics::counter!("retry_exhausted_total", "operation" => operation.to_string()).increment(1);
}

/// Record a handler fault classified by the router.
pub fn record_handler_fault(trusted: bool, bailout: bool) {
    metrics::counter!(
        "router_faults_total",
        "trusted" => trusted.to_string(),
        "bailout" => bailout.to_string()
    )
    .increment(1);
}

/// Record a finished HTTP request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("http_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}
