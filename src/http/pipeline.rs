//! Admission and fault-isolation pipeline.
//!
//! # Stage Order (outermost first)
//! ```text
//! request ──▶ Instrumentation   times the entire remaining chain, failures included
//!             Logging           one structured record per request
//!             RateLimit         rejects before any heavier work
//!             Tracing           child span linked to the inbound context
//!             PanicRecovery     inside tracing, around everything below it
//!             CircuitBreaker    guards only the terminal handlers
//!             terminal router
//! ```
//!
//! Moving PanicRecovery outward of CircuitBreaker, or RateLimit inward of
//! it, changes which failures are counted and which work a rejected request
//! still performs. The order is therefore data ([`STAGE_ORDER`]) and
//! [`Pipeline::wrap`] iterates it rather than listing layers by hand.

use std::fmt;
use std::sync::Arc;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    Router,
};

use crate::http::recovery::panic_recovery_middleware;
use crate::observability::instrumentation::{instrumentation_middleware, Instrumentation};
use crate::observability::logging::{logging_middleware, TransportLog};
use crate::observability::tracing::{tracing_middleware, TracingPropagator};
use crate::resilience::circuit_breaker::{circuit_breaker_middleware, CircuitBreaker};
use crate::security::rate_limit::{rate_limit_middleware, RateLimitState, RateLimiter};

/// Identifies one stage of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Instrumentation,
    Logging,
    RateLimit,
    Tracing,
    PanicRecovery,
    CircuitBreaker,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Instrumentation => "instrumentation",
            PipelineStage::Logging => "logging",
            PipelineStage::RateLimit => "rate_limit",
            PipelineStage::Tracing => "tracing",
            PipelineStage::PanicRecovery => "panic_recovery",
            PipelineStage::CircuitBreaker => "circuit_breaker",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every stage, outermost first.
pub const STAGE_ORDER: [PipelineStage; 6] = [
    PipelineStage::Instrumentation,
    PipelineStage::Logging,
    PipelineStage::RateLimit,
    PipelineStage::Tracing,
    PipelineStage::PanicRecovery,
    PipelineStage::CircuitBreaker,
];

/// The configured stages, ready to wrap a terminal router.
///
/// Instrumentation, logging and panic recovery are always present; the
/// rate limiter, tracing and breaker are optional. Leaving a stage out
/// never reorders the others.
#[derive(Clone)]
pub struct Pipeline {
    instrumentation: Instrumentation,
    transport_log: TransportLog,
    rate_limit: Option<RateLimitState>,
    tracing: Option<TracingPropagator>,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl Pipeline {
    pub fn new(instrumentation: Instrumentation) -> Self {
        Self {
            instrumentation,
            transport_log: TransportLog::default(),
            rate_limit: None,
            tracing: None,
            breaker: None,
        }
    }

    /// Key clients by `X-Forwarded-For` / `X-Real-IP` when present.
    pub fn with_forwarded_for(mut self, trust: bool) -> Self {
        self.transport_log.trust_forwarded_for = trust;
        if let Some(state) = &mut self.rate_limit {
            state.trust_forwarded_for = trust;
        }
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>, trust_forwarded_for: bool) -> Self {
        self.rate_limit = Some(RateLimitState {
            limiter,
            trust_forwarded_for,
        });
        self.transport_log.trust_forwarded_for = trust_forwarded_for;
        self
    }

    pub fn with_tracing(mut self, propagator: TracingPropagator) -> Self {
        self.tracing = Some(propagator);
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    fn is_enabled(&self, stage: PipelineStage) -> bool {
        match stage {
            PipelineStage::RateLimit => self.rate_limit.is_some(),
            PipelineStage::Tracing => self.tracing.is_some(),
            PipelineStage::CircuitBreaker => self.breaker.is_some(),
            PipelineStage::Instrumentation
            | PipelineStage::Logging
            | PipelineStage::PanicRecovery => true,
        }
    }

    /// Enabled stages, outermost first.
    pub fn stages(&self) -> Vec<PipelineStage> {
        STAGE_ORDER
            .into_iter()
            .filter(|stage| self.is_enabled(*stage))
            .collect()
    }

    /// Wrap `terminal` in every enabled stage.
    ///
    /// Axum runs the most recently added layer first, so stages are applied
    /// innermost first.
    pub fn wrap(&self, terminal: Router) -> Router {
        self.wrap_with_control(terminal, Router::new())
    }

    /// Like [`wrap`](Self::wrap), but `control` routes skip the circuit
    /// breaker. They still pass every other stage.
    pub fn wrap_with_control(&self, guarded: Router, control: Router) -> Router {
        let mut control = Some(control);
        let mut router = guarded;
        for stage in self.stages().into_iter().rev() {
            if stage != PipelineStage::CircuitBreaker {
                if let Some(control) = control.take() {
                    router = router.merge(control);
                }
            }
            router = self.apply(router, stage);
        }
        router
    }

    fn apply(&self, router: Router, stage: PipelineStage) -> Router {
        match stage {
            PipelineStage::Instrumentation => router.layer(from_fn_with_state(
                self.instrumentation.clone(),
                instrumentation_middleware,
            )),
            PipelineStage::Logging => {
                router.layer(from_fn_with_state(self.transport_log, logging_middleware))
            }
            PipelineStage::RateLimit => match &self.rate_limit {
                Some(state) => router.layer(from_fn_with_state(state.clone(), rate_limit_middleware)),
                None => router,
            },
            PipelineStage::Tracing => match &self.tracing {
                Some(propagator) => {
                    router.layer(from_fn_with_state(propagator.clone(), tracing_middleware))
                }
                None => router,
            },
            PipelineStage::PanicRecovery => router.layer(from_fn(panic_recovery_middleware)),
            PipelineStage::CircuitBreaker => match &self.breaker {
                Some(breaker) => {
                    router.layer(from_fn_with_state(breaker.clone(), circuit_breaker_middleware))
                }
                None => router,
            },
        }
    }
}
