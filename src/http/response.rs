//! Rejection responses produced by the pipeline itself.
//!
//! Each variant is decided locally by one stage and never propagates past
//! it. Bodies are fixed text so no internal detail reaches the client.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    /// The client's token bucket is empty.
    #[error("Too Many Requests")]
    AdmissionRejected,

    /// The breaker is open and refused the call.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// The breaker is half-open and its trial slots are taken.
    #[error("too many requests in half-open state")]
    HalfOpenSaturated,

    /// A panic was caught below the recovery stage.
    #[error("Internal Server Error")]
    UnrecoveredFault,

    /// No client key could be derived from the connection.
    #[error("Internal Server Error")]
    MissingClientKey,
}

impl Rejection {
    /// Stable label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::AdmissionRejected => "admission_rejected",
            Rejection::CircuitOpen => "circuit_open",
            Rejection::HalfOpenSaturated => "half_open_saturated",
            Rejection::UnrecoveredFault => "unrecovered_fault",
            Rejection::MissingClientKey => "missing_client_key",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::AdmissionRejected => StatusCode::TOO_MANY_REQUESTS,
            Rejection::CircuitOpen | Rejection::HalfOpenSaturated => StatusCode::SERVICE_UNAVAILABLE,
            Rejection::UnrecoveredFault | Rejection::MissingClientKey => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let mut response = (self.status(), self.to_string()).into_response();
        response.extensions_mut().insert(self);
        response
    }
}
