//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, connect info, graceful shutdown)
//!     → request.rs (stamp or keep X-Request-ID)
//!     → pipeline.rs (admission and fault-isolation stages)
//!     → chaos.rs (optional fault injection)
//!     → handlers.rs (probes and exercise endpoints)
//!     → response.rs (rejection bodies)
//! ```

pub mod chaos;
pub mod handlers;
pub mod pipeline;
pub mod recovery;
pub mod request;
pub mod response;
pub mod server;

pub use pipeline::{Pipeline, PipelineStage, STAGE_ORDER};
pub use request::X_REQUEST_ID;
pub use response::Rejection;
pub use server::HttpServer;
