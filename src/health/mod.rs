//! Health reporting subsystem.
//!
//! # Data Flow
//! ```text
//! HttpServer::run
//!     → state.rs (mark started once bound, stopping on shutdown)
//!     → /healthz, /readyz handlers read the flags
//! ```

pub mod state;

pub use state::ServiceHealth;
