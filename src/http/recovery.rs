//! Panic recovery.
//!
//! A panic anywhere below this stage unwinds into `catch_unwind` here, is
//! logged with its message and turned into a bare 500. The connection task
//! keeps running and serves the next request.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use axum::{
    body::Body,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures_util::FutureExt;

use crate::http::response::Rejection;
use crate::observability::metrics;

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Middleware converting panics in the inner chain into a generic 500.
pub async fn panic_recovery_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => {
            tracing::error!(
                panic = %panic_message(payload.as_ref()),
                method = %method,
                path = %path,
                "Panic occurred"
            );
            metrics::record_panic();
            Rejection::UnrecoveredFault.into_response()
        }
    }
}
