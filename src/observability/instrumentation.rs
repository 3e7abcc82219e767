//! Per-request duration observations.
//!
//! One observation is recorded for every request that enters the stage,
//! from a drop guard, so requests that are rejected, fail or are cancelled
//! midway are timed as well.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::observability::metrics;

/// Result label attached to each observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    /// Rejections and server errors are failures; everything else completed normally.
    pub fn from_status(status: StatusCode) -> Self {
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Outcome::Failure
        } else {
            Outcome::Success
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Destination for request duration observations.
pub trait MetricsSink: Send + Sync {
    fn observe(&self, operation: &str, outcome: Outcome, duration: Duration);
}

/// Records into the `metrics` facade, which the Prometheus exporter scrapes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusSink;

impl MetricsSink for PrometheusSink {
    fn observe(&self, operation: &str, outcome: Outcome, duration: Duration) {
        metrics::record_request_duration(operation, outcome.is_success(), duration);
    }
}

/// State handed to [`instrumentation_middleware`].
#[derive(Clone)]
pub struct Instrumentation {
    operation: Arc<str>,
    sink: Arc<dyn MetricsSink>,
}

impl Instrumentation {
    pub fn new(operation: impl Into<Arc<str>>, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            operation: operation.into(),
            sink,
        }
    }

    pub fn prometheus(operation: impl Into<Arc<str>>) -> Self {
        Self::new(operation, Arc::new(PrometheusSink))
    }
}

struct Observation<'a> {
    instrumentation: &'a Instrumentation,
    started: Instant,
    outcome: Option<Outcome>,
}

impl Drop for Observation<'_> {
    fn drop(&mut self) {
        // No outcome means the request future was dropped before completing.
        let outcome = self.outcome.unwrap_or(Outcome::Failure);
        self.instrumentation
            .sink
            .observe(&self.instrumentation.operation, outcome, self.started.elapsed());
    }
}

/// Middleware timing the entire remaining chain.
pub async fn instrumentation_middleware(
    State(instrumentation): State<Instrumentation>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mut observation = Observation {
        instrumentation: &instrumentation,
        started: Instant::now(),
        outcome: None,
    };

    let response = next.run(request).await;
    observation.outcome = Some(Outcome::from_status(response.status()));
    response
}
