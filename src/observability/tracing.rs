//! Distributed tracing support.
//!
//! # Responsibilities
//! - Extract trace context from incoming requests
//! - Create a child span for each request and propagate it downstream
//! - Report every span exactly once when the request leaves the stage
//!
//! # Design Decisions
//! - W3C Trace Context (`traceparent`) is the wire carrier
//! - A `TraceContext` already present in request extensions wins over the header
//! - Spans are finished from a drop guard, so panics and cancellations still report

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use rand::Rng;
use tracing::Instrument;

pub const TRACEPARENT: &str = "traceparent";

/// The identifiers of one span within a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: u128,
    pub span_id: u64,
    pub sampled: bool,
}

impl TraceContext {
    /// Parse a version-00 `traceparent` header value.
    pub fn from_traceparent(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;
        if parts.next().is_some() || version != "00" {
            return None;
        }
        if trace_id.len() != 32 || span_id.len() != 16 || flags.len() != 2 {
            return None;
        }

        let trace_id = u128::from_str_radix(trace_id, 16).ok()?;
        let span_id = u64::from_str_radix(span_id, 16).ok()?;
        let flags = u8::from_str_radix(flags, 16).ok()?;
        if trace_id == 0 || span_id == 0 {
            return None;
        }

        Some(Self {
            trace_id,
            span_id,
            sampled: flags & 0x01 == 0x01,
        })
    }

    pub fn to_traceparent(&self) -> String {
        format!(
            "00-{:032x}-{:016x}-{:02x}",
            self.trace_id,
            self.span_id,
            u8::from(self.sampled)
        )
    }

    /// A new span in `parent`'s trace, or the root of a new sampled trace.
    pub fn child_of(parent: Option<&TraceContext>) -> Self {
        let mut rng = rand::thread_rng();
        match parent {
            Some(parent) => Self {
                trace_id: parent.trace_id,
                span_id: rng.gen_range(1..=u64::MAX),
                sampled: parent.sampled,
            },
            None => Self {
                trace_id: rng.gen_range(1..=u128::MAX),
                span_id: rng.gen_range(1..=u64::MAX),
                sampled: true,
            },
        }
    }

    /// Read the inbound context: request extensions first, then the header.
    pub fn extract(request: &Request<Body>) -> Option<Self> {
        request
            .extensions()
            .get::<TraceContext>()
            .copied()
            .or_else(|| Self::from_headers(request.headers()))
    }

    fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(TRACEPARENT)
            .and_then(|v| v.to_str().ok())
            .and_then(Self::from_traceparent)
    }

    /// Make this context the one seen by everything downstream.
    pub fn inject(&self, request: &mut Request<Body>) {
        request.extensions_mut().insert(*self);
        if let Ok(value) = HeaderValue::from_str(&self.to_traceparent()) {
            request.headers_mut().insert(TRACEPARENT, value);
        }
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}:{:016x}", self.trace_id, self.span_id)
    }
}

/// A completed request span.
#[derive(Debug, Clone)]
pub struct FinishedSpan {
    pub service: Arc<str>,
    pub operation: Arc<str>,
    pub context: TraceContext,
    pub parent_span_id: Option<u64>,
    /// `None` when the request never produced a response (panic or cancellation).
    pub status: Option<StatusCode>,
    pub duration: Duration,
}

/// Where finished spans go.
pub trait SpanReporter: Send + Sync {
    fn report(&self, span: FinishedSpan);
}

/// Writes finished spans to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl SpanReporter for LogReporter {
    fn report(&self, span: FinishedSpan) {
        tracing::debug!(
            service = %span.service,
            operation = %span.operation,
            trace_id = %format_args!("{:032x}", span.context.trace_id),
            span_id = %format_args!("{:016x}", span.context.span_id),
            parent_span_id = ?span.parent_span_id.map(|id| format!("{:016x}", id)),
            status = ?span.status.map(|s| s.as_u16()),
            duration = ?span.duration,
            "Span finished"
        );
    }
}

/// State handed to [`tracing_middleware`].
#[derive(Clone)]
pub struct TracingPropagator {
    service: Arc<str>,
    operation: Arc<str>,
    reporter: Arc<dyn SpanReporter>,
}

impl TracingPropagator {
    pub fn new(
        service: impl Into<Arc<str>>,
        operation: impl Into<Arc<str>>,
        reporter: Arc<dyn SpanReporter>,
    ) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
            reporter,
        }
    }
}

struct SpanGuard<'a> {
    propagator: &'a TracingPropagator,
    context: TraceContext,
    parent_span_id: Option<u64>,
    started: Instant,
    status: Option<StatusCode>,
}

impl Drop for SpanGuard<'_> {
    fn drop(&mut self) {
        self.propagator.reporter.report(FinishedSpan {
            service: self.propagator.service.clone(),
            operation: self.propagator.operation.clone(),
            context: self.context,
            parent_span_id: self.parent_span_id,
            status: self.status,
            duration: self.started.elapsed(),
        });
    }
}

/// Middleware creating a child span linked to the inbound trace context.
pub async fn tracing_middleware(
    State(propagator): State<TracingPropagator>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let parent = TraceContext::extract(&request);
    let context = TraceContext::child_of(parent.as_ref());
    context.inject(&mut request);

    let span = tracing::info_span!(
        "request",
        operation = %propagator.operation,
        trace_id = %format_args!("{:032x}", context.trace_id),
        span_id = %format_args!("{:016x}", context.span_id),
    );

    let mut guard = SpanGuard {
        propagator: &propagator,
        context,
        parent_span_id: parent.map(|p| p.span_id),
        started: Instant::now(),
        status: None,
    };

    let mut response = next.run(request).instrument(span).await;
    guard.status = Some(response.status());

    if let Ok(value) = HeaderValue::from_str(&context.to_traceparent()) {
        response.headers_mut().insert(TRACEPARENT, value);
    }
    response
}
