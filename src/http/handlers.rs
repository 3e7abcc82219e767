//! Terminal handlers: probes and exercise endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::health::ServiceHealth;

pub const X_API_VERSION: HeaderName = HeaderName::from_static("x-api-version");

/// Longest accepted `/delay/{secs}`.
const MAX_DELAY_SECS: u64 = 60;

#[derive(Serialize)]
pub struct VersionInfo {
    pub name: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ProbeStatus {
    pub status: &'static str,
}

/// Exercise endpoints, guarded by the circuit breaker.
pub fn router() -> Router {
    Router::new()
        .route("/version", get(version))
        .route("/echo", post(echo))
        .route("/panic", get(panic_handler))
        .route("/status/{code}", get(status).post(status).put(status))
        .route("/delay/{secs}", get(delay))
}

/// Liveness and readiness endpoints.
///
/// Their 503s describe this instance, not a downstream, so they are kept out
/// of the breaker's accounting and stay reachable while it is open.
pub fn control_router(health: Arc<ServiceHealth>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/readyz/enable", post(enable_ready))
        .route("/readyz/disable", post(disable_ready))
        .with_state(health)
}

async fn healthz(State(health): State<Arc<ServiceHealth>>) -> Response {
    probe(health.is_healthy())
}

async fn readyz(State(health): State<Arc<ServiceHealth>>) -> Response {
    probe(health.is_ready())
}

fn probe(ok: bool) -> Response {
    if ok {
        Json(ProbeStatus { status: "OK" }).into_response()
    } else {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    }
}

async fn enable_ready(State(health): State<Arc<ServiceHealth>>) -> StatusCode {
    health.set_ready(true);
    tracing::info!("Readiness enabled");
    StatusCode::ACCEPTED
}

async fn disable_ready(State(health): State<Arc<ServiceHealth>>) -> StatusCode {
    health.set_ready(false);
    tracing::info!("Readiness disabled");
    StatusCode::ACCEPTED
}

async fn version() -> Json<VersionInfo> {
    Json(VersionInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn echo(body: Bytes) -> Bytes {
    body
}

async fn panic_handler() -> StatusCode {
    panic!("deliberate panic from /panic");
}

async fn status(Path(code): Path<u16>) -> Response {
    match StatusCode::from_u16(code) {
        Ok(status) => {
            let reason = status.canonical_reason().unwrap_or("");
            (status, Json(ProbeStatus { status: reason })).into_response()
        }
        Err(_) => (StatusCode::BAD_REQUEST, "invalid status code").into_response(),
    }
}

async fn delay(Path(secs): Path<u64>) -> Response {
    if secs > MAX_DELAY_SECS {
        return (StatusCode::BAD_REQUEST, "delay too long").into_response();
    }
    tokio::time::sleep(Duration::from_secs(secs)).await;
    Json(serde_json::json!({ "delay": secs })).into_response()
}

/// Stamp every terminal response with the API version.
pub async fn version_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        X_API_VERSION,
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    response
}
