//! Per-client token bucket rate limiting with idle eviction.
//!
//! Every distinct client key gets its own bucket, created lazily at full
//! capacity. A sweeper task drops visitors that have been idle for longer
//! than the eviction threshold, so rotating or spoofed client identities
//! cannot grow the table without bound.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::config::RateLimitConfig;
use crate::http::response::Rejection;
use crate::observability::metrics;

/// A simple token bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    fn try_acquire(&mut self, now: Instant, capacity: f64, refill_rate: f64) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Limiter state for a single client key.
#[derive(Debug)]
struct Visitor {
    bucket: TokenBucket,
    last_seen: Instant,
}

/// Per-client rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    visitors: Mutex<HashMap<String, Visitor>>,
    refill_rate: f64,
    burst: f64,
    idle_threshold: Duration,
    sweep_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            visitors: Mutex::new(HashMap::new()),
            refill_rate: config.requests_per_second,
            burst: f64::from(config.burst_size),
            idle_threshold: config.idle_eviction(),
            sweep_interval: config.sweep_interval(),
            clock,
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Visitor>> {
        // A panic while holding the lock leaves every entry in a usable state.
        self.visitors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take one token from `client_key`'s bucket. Returns false when the
    /// bucket is empty; the caller must then reject the request.
    pub fn admit(&self, client_key: &str) -> bool {
        let now = self.clock.now();
        let mut visitors = self.table();

        let visitor = visitors
            .entry(client_key.to_string())
            .or_insert_with(|| Visitor {
                bucket: TokenBucket::new(self.burst, now),
                last_seen: now,
            });

        if now > visitor.last_seen {
            visitor.last_seen = now;
        }
        visitor.bucket.try_acquire(now, self.burst, self.refill_rate)
    }

    /// Remove visitors idle for at least the eviction threshold.
    /// Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let threshold = self.idle_threshold;
        let mut visitors = self.table();

        let before = visitors.len();
        visitors.retain(|_, v| now.saturating_duration_since(v.last_seen) < threshold);
        let removed = before - visitors.len();

        metrics::record_visitor_count(visitors.len());
        if removed > 0 {
            tracing::debug!(removed, remaining = visitors.len(), "Evicted idle rate limit visitors");
        }
        removed
    }

    /// Number of client keys currently tracked.
    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run [`sweep`](Self::sweep) every sweep interval until shutdown.
    pub fn spawn_sweeper(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.sweep_interval);
            // The first tick completes immediately; nothing can be idle yet.
            ticker.tick().await;

            tracing::info!(
                interval = ?self.sweep_interval,
                idle_threshold = ?self.idle_threshold,
                "Rate limit sweeper starting"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep();
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Rate limit sweeper received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }
}

/// State handed to [`rate_limit_middleware`].
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
    pub trust_forwarded_for: bool,
}

/// Derive the key a request is limited under: the peer IP with the port
/// stripped, or the first forwarded address when proxies are trusted.
pub fn client_key(request: &Request<Body>, trust_forwarded_for: bool) -> Option<String> {
    if trust_forwarded_for {
        let headers = request.headers();
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
            .map(str::trim)
            .filter(|v| !v.is_empty());

        if let Some(addr) = forwarded {
            return Some(addr.to_string());
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

/// Middleware function for per-client rate limiting.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(key) = client_key(&request, state.trust_forwarded_for) else {
        tracing::error!(uri = %request.uri(), "Cannot derive client key for rate limiting");
        return Rejection::MissingClientKey.into_response();
    };

    if state.limiter.admit(&key) {
        next.run(request).await
    } else {
        tracing::warn!(client = %key, "Rate limit exceeded");
        metrics::record_rate_limited("rps_limit");
        Rejection::AdmissionRejected.into_response()
    }
}
