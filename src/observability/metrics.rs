//! Metrics collection and exposition.
//!
//! # Metrics
//! - `users_gateway_request_duration_seconds` (histogram): latency by operation and success
//! - `users_gateway_rate_limited_total` (counter): requests rejected by the limiter
//! - `users_gateway_rate_limit_visitors` (gauge): tracked client keys after each sweep
//! - `users_gateway_breaker_state` (gauge): 0=closed, 1=open, 2=half-open per breaker
//! - `users_gateway_breaker_rejections_total` (counter): calls refused by a breaker
//! - `users_gateway_panics_total` (counter): panics caught by the recovery stage
//!
//! # Design Decisions
//! - Low-overhead metric updates through the `metrics` facade
//! - The Prometheus exporter is installed once by the binary; without it every
//!   call here is a no-op, which keeps tests free of global state

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request_duration(operation: &str, success: bool, duration: Duration) {
    histogram!(
        "users_gateway_request_duration_seconds",
        "method" => operation.to_string(),
        "success" => if success { "true" } else { "false" }
    )
    .record(duration.as_secs_f64());
}

pub fn record_rate_limited(reason: &'static str) {
    counter!("users_gateway_rate_limited_total", "reason" => reason).increment(1);
}

pub fn record_visitor_count(count: usize) {
    gauge!("users_gateway_rate_limit_visitors").set(count as f64);
}

pub fn record_breaker_state(name: &str, state: u8) {
    gauge!("users_gateway_breaker_state", "breaker" => name.to_string()).set(f64::from(state));
}

pub fn record_breaker_rejection(name: &str) {
    counter!("users_gateway_breaker_rejections_total", "breaker" => name.to_string()).increment(1);
}

pub fn record_panic() {
    counter!("users_gateway_panics_total").increment(1);
}
