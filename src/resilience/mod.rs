//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to the terminal handlers:
//!     → circuit_breaker.rs (reject while open, count 5xx and panics as failures)
//! ```

pub mod circuit_breaker;
