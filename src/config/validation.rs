//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (rates > 0, intervals > 0, ratios in range)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::GatewayConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be > 0")]
    NotPositive { field: &'static str },

    #[error("{field} must be within [0, 1] (got {value})")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("rate_limit.idle_eviction_secs ({idle}) must not be shorter than sweep_interval_secs ({sweep})")]
    EvictionShorterThanSweep { idle: u64, sweep: u64 },
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    let rl = &config.rate_limit;
    if rl.enabled {
        if !(rl.requests_per_second > 0.0) {
            errors.push(ValidationError::NotPositive { field: "rate_limit.requests_per_second" });
        }
        if rl.burst_size == 0 {
            errors.push(ValidationError::NotPositive { field: "rate_limit.burst_size" });
        }
        if rl.sweep_interval_secs == 0 {
            errors.push(ValidationError::NotPositive { field: "rate_limit.sweep_interval_secs" });
        }
        if rl.idle_eviction_secs == 0 {
            errors.push(ValidationError::NotPositive { field: "rate_limit.idle_eviction_secs" });
        } else if rl.idle_eviction_secs < rl.sweep_interval_secs {
            errors.push(ValidationError::EvictionShorterThanSweep {
                idle: rl.idle_eviction_secs,
                sweep: rl.sweep_interval_secs,
            });
        }
    }

    let cb = &config.circuit_breaker;
    if cb.enabled && !(0.0..=1.0).contains(&cb.trip_failure_ratio) {
        errors.push(ValidationError::OutOfRange {
            field: "circuit_breaker.trip_failure_ratio",
            value: cb.trip_failure_ratio,
        });
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::NotPositive { field: "timeouts.request_secs" });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
