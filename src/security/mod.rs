//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (per-client token bucket)
//!     → Pass to tracing and the rest of the pipeline
//! ```
//!
//! # Design Decisions
//! - Fail closed: a request with no identifiable client is rejected
//! - Forwarded-for headers are only trusted when configured

pub mod rate_limit;
