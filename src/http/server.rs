//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the exercise router (inside the breaker) and the probe router
//!   (outside it)
//! - Wrap both in the admission pipeline
//! - Stamp request IDs outside every pipeline stage
//! - Bind, serve, and drain on shutdown

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{http::StatusCode, middleware::from_fn, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::timeout::TimeoutLayer;

use crate::config::GatewayConfig;
use crate::health::ServiceHealth;
use crate::http::chaos::{random_delay_middleware, random_error_middleware};
use crate::http::handlers::{self, version_middleware};
use crate::http::pipeline::Pipeline;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::observability::instrumentation::Instrumentation;
use crate::observability::tracing::{LogReporter, TracingPropagator};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerSettings};
use crate::security::rate_limit::RateLimiter;

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    config: GatewayConfig,
    health: Arc<ServiceHealth>,
    limiter: Option<Arc<RateLimiter>>,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: GatewayConfig) -> Self {
        let health = Arc::new(ServiceHealth::new());

        let mut pipeline = Pipeline::new(Instrumentation::prometheus(
            config.observability.operation_name.as_str(),
        ))
        .with_forwarded_for(config.rate_limit.trust_forwarded_for);

        let limiter = config
            .rate_limit
            .enabled
            .then(|| Arc::new(RateLimiter::new(&config.rate_limit)));
        if let Some(limiter) = &limiter {
            pipeline = pipeline.with_rate_limiter(limiter.clone(), config.rate_limit.trust_forwarded_for);
        }

        if config.tracing.enabled {
            pipeline = pipeline.with_tracing(TracingPropagator::new(
                config.tracing.service_name.as_str(),
                config.tracing.operation_name.as_str(),
                Arc::new(LogReporter),
            ));
        }

        let breaker = config.circuit_breaker.enabled.then(|| {
            Arc::new(CircuitBreaker::new(CircuitBreakerSettings::from_config(
                &config.circuit_breaker,
            )))
        });
        if let Some(breaker) = &breaker {
            pipeline = pipeline.with_circuit_breaker(breaker.clone());
        }

        let router = pipeline
            .wrap_with_control(
                Self::terminal_router(&config),
                handlers::control_router(health.clone()).layer(from_fn(version_middleware)),
            )
            .layer(propagate_request_id_layer())
            .layer(set_request_id_layer());

        Self {
            router,
            config,
            health,
            limiter,
            breaker,
        }
    }

    /// Exercise handlers plus the layers that belong inside the breaker.
    ///
    /// A handler that outlives the request timeout answers 504, which the
    /// breaker counts as a failure.
    fn terminal_router(config: &GatewayConfig) -> Router {
        let mut router = handlers::router().layer(from_fn(version_middleware));

        if config.chaos.random_error {
            router = router.layer(from_fn(random_error_middleware));
        }
        if config.chaos.random_delay {
            router = router.layer(from_fn(random_delay_middleware));
        }

        router.layer(TimeoutLayer::with_status_code(
            StatusCode::GATEWAY_TIMEOUT,
            Duration::from_secs(config.timeouts.request_secs),
        ))
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let sweeper = self
            .limiter
            .clone()
            .map(|limiter| limiter.spawn_sweeper(shutdown.resubscribe()));

        let mut deadline_signal = shutdown.resubscribe();
        let drain_deadline = Duration::from_secs(self.config.timeouts.shutdown_secs);

        let health = self.health.clone();
        health.mark_started();

        let signal = async move {
            let _ = shutdown.recv().await;
            health.mark_stopping();
            tracing::info!("Shutdown signal received, draining connections");
        };

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .into_future();

        tokio::select! {
            result = serve => result?,
            _ = async {
                let _ = deadline_signal.recv().await;
                tokio::time::sleep(drain_deadline).await;
            } => {
                tracing::warn!(deadline = ?drain_deadline, "Drain deadline exceeded, closing remaining connections");
            }
        }

        if let Some(sweeper) = sweeper {
            let _ = sweeper.await;
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// The fully wrapped router, for driving the server without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn health(&self) -> Arc<ServiceHealth> {
        self.health.clone()
    }

    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.limiter.as_ref()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}
