//! Structured logging.
//!
//! # Responsibilities
//! - Initialize logging subsystem
//! - Emit one structured record per request
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - Log level configurable via config and environment (`RUST_LOG` wins)

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};
use crate::http::request::X_REQUEST_ID;
use crate::http::response::Rejection;
use crate::security::rate_limit::client_key;

/// Install the global tracing subscriber.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "users_gateway={level},tower_http={level}",
            level = config.log_level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// State handed to [`logging_middleware`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportLog {
    /// Must match the rate limiter's setting so records carry its key.
    pub trust_forwarded_for: bool,
}

/// Request metadata captured on entry, logged on exit.
struct RequestRecord {
    method: String,
    path: String,
    remote: String,
    client: String,
    user_agent: String,
    request_id: String,
    started: Instant,
    status: Option<StatusCode>,
    rejection: Option<Rejection>,
}

impl Drop for RequestRecord {
    fn drop(&mut self) {
        let duration = self.started.elapsed();
        match self.status {
            Some(status) => tracing::info!(
                method = %self.method,
                path = %self.path,
                remote = %self.remote,
                client = %self.client,
                rejection = self.rejection.map_or("none", |r| r.kind()),
                user_agent = %self.user_agent,
                request_id = %self.request_id,
                status = status.as_u16(),
                duration = ?duration,
                "Transport log"
            ),
            None => tracing::warn!(
                method = %self.method,
                path = %self.path,
                remote = %self.remote,
                client = %self.client,
                user_agent = %self.user_agent,
                request_id = %self.request_id,
                duration = ?duration,
                "Transport log: request cancelled before completion"
            ),
        }
    }
}

/// Middleware logging request metadata and total duration.
pub async fn logging_middleware(
    State(config): State<TransportLog>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let client = client_key(&request, config.trust_forwarded_for)
        .unwrap_or_else(|| "unknown".to_string());
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    tracing::debug!(
        proto = ?request.version(),
        uri = %request.uri(),
        method = %request.method(),
        remote = %remote,
        user_agent = %user_agent,
        "Request started"
    );

    let mut record = RequestRecord {
        method: request.method().to_string(),
        path: request.uri().path().to_string(),
        remote,
        client,
        user_agent,
        request_id,
        started: Instant::now(),
        status: None,
        rejection: None,
    };

    let response = next.run(request).await;
    record.status = Some(response.status());
    record.rejection = response.extensions().get::<Rejection>().copied();
    response
}
