//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Per-client rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Circuit breaker guarding the terminal handlers.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Span creation and trace context propagation.
    pub tracing: TracingConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,

    /// Fault injection for exercising the breaker.
    pub chaos: ChaosConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Tokens added to each client's bucket per second.
    pub requests_per_second: f64,

    /// Bucket capacity.
    pub burst_size: u32,

    /// Visitors not seen for this long are evicted by the sweeper.
    pub idle_eviction_secs: u64,

    /// How often the sweeper runs.
    pub sweep_interval_secs: u64,

    /// Key clients by `X-Forwarded-For` / `X-Real-IP` instead of the peer address.
    /// Only safe behind a proxy that overwrites these headers.
    pub trust_forwarded_for: bool,
}

impl RateLimitConfig {
    pub fn idle_eviction(&self) -> Duration {
        Duration::from_secs(self.idle_eviction_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 1.0,
            burst_size: 5,
            idle_eviction_secs: 180,
            sweep_interval_secs: 60,
            trust_forwarded_for: false,
        }
    }
}

/// Circuit breaker configuration.
///
/// The trip condition is expressed as the two thresholds of the default
/// predicate; code that needs a different predicate builds the breaker
/// directly with `CircuitBreakerSettings::with_ready_to_trip`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable the breaker stage.
    pub enabled: bool,

    /// Name used in logs and metrics.
    pub name: String,

    /// Calls admitted while half-open (0 means 1).
    pub max_requests: u32,

    /// Time spent open before a trial call is allowed (0 means 60s).
    pub open_timeout_secs: u64,

    /// Closed-state counts are cleared this often (0 disables clearing).
    pub interval_secs: u64,

    /// Trip when consecutive failures exceed this.
    pub trip_consecutive_failures: u32,

    /// Trip when the failure ratio exceeds this.
    pub trip_failure_ratio: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "users_microservice".to_string(),
            max_requests: 5,
            open_timeout_secs: 0,
            interval_secs: 60,
            trip_consecutive_failures: 4,
            trip_failure_ratio: 0.5,
        }
    }
}

/// Tracing (span) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Enable the span propagation stage.
    pub enabled: bool,

    /// Name given to the per-request span.
    pub operation_name: String,

    /// Service name attached to finished spans.
    pub service_name: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            operation_name: "API".to_string(),
            service_name: "users-gateway".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout for terminal handlers in seconds.
    pub request_secs: u64,

    /// Grace period for in-flight requests on shutdown in seconds.
    pub shutdown_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            shutdown_secs: 10,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Operation label attached to request duration observations.
    pub operation_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
            operation_name: "API".to_string(),
        }
    }
}

/// Fault injection settings. Both off unless explicitly enabled.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ChaosConfig {
    /// Delay terminal responses by a random 0-5s.
    pub random_delay: bool,

    /// Fail a random third of terminal responses with a 5xx.
    pub random_error: bool,
}
