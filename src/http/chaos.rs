//! Fault injection for exercising the breaker and the dashboards.
//!
//! Both middlewares sit inside the circuit breaker, directly around the
//! terminal handlers, so the faults they inject are seen as downstream
//! failures.

use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

const MAX_DELAY_MS: u64 = 5_000;

const INJECTED_ERRORS: [StatusCode; 3] = [
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
];

/// Delay each request by a random 0-5s before handling it.
pub async fn random_delay_middleware(request: Request<Body>, next: Next) -> Response {
    let delay = Duration::from_millis(fastrand::u64(0..=MAX_DELAY_MS));
    tracing::debug!(delay = ?delay, "Injecting random delay");
    tokio::time::sleep(delay).await;
    next.run(request).await
}

/// Fail roughly one request in three with a random 5xx.
pub async fn random_error_middleware(request: Request<Body>, next: Next) -> Response {
    if fastrand::u8(0..3) == 0 {
        let status = INJECTED_ERRORS[fastrand::usize(..INJECTED_ERRORS.len())];
        tracing::debug!(status = %status, "Injecting random error");
        return (status, "injected failure").into_response();
    }
    next.run(request).await
}
