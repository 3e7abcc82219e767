//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every request passes through:
//!     → instrumentation.rs (duration histogram per outcome)
//!     → logging.rs (one structured record)
//!     → tracing.rs (child span, traceparent propagation)
//!
//! Other subsystems report through:
//!     → metrics.rs (counters, gauges, histograms)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through all subsystems
//! - Metric and span sinks are traits so tests can record them

pub mod instrumentation;
pub mod logging;
pub mod metrics;
pub mod tracing;
