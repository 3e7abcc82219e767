//! Circuit breaker guarding the terminal handlers.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: downstream assumed down, requests fail fast
//! - Half-Open: a bounded number of trial requests test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: ready_to_trip(counts) after a failure
//! Open → Half-Open: first call attempt once open_timeout has elapsed (lazy, no timer)
//! Half-Open → Closed: max_requests consecutive successes
//! Half-Open → Open: any failure
//! ```
//!
//! Every transition starts a new generation and clears the counts. Outcomes
//! of calls admitted under an older generation are ignored.
//!
//! # Design Decisions
//! - The lock guards bookkeeping only; the protected call runs outside it
//! - A call that panics or is dropped mid-flight counts as a failure
//! - Rejections are distinct from the protected call's own error

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::clock::{Clock, SystemClock};
use crate::config::CircuitBreakerConfig;
use crate::http::response::Rejection;
use crate::observability::metrics;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request statistics for the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }

    fn clear(&mut self) {
        *self = Counts::default();
    }

    /// Failures over requests; 0 when nothing was requested.
    pub fn failure_ratio(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            f64::from(self.total_failures) / f64::from(self.requests)
        }
    }
}

/// Decides, after a failure in the closed state, whether to open.
pub type ReadyToTrip = Arc<dyn Fn(&Counts) -> bool + Send + Sync>;

/// Called with (breaker name, from, to) on every transition, after the
/// breaker's lock is released. A panicking hook is logged and ignored.
pub type StateChangeHook = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

/// Trip when more than `consecutive` failures happened in a row or the
/// failure ratio exceeds `ratio`.
pub fn threshold_trip(consecutive: u32, ratio: f64) -> ReadyToTrip {
    Arc::new(move |counts: &Counts| {
        counts.consecutive_failures > consecutive || counts.failure_ratio() > ratio
    })
}

/// `consecutive_failures > 4 || failure_ratio > 0.5`
pub fn default_ready_to_trip(counts: &Counts) -> bool {
    counts.consecutive_failures > 4 || counts.failure_ratio() > 0.5
}

/// Construction parameters for a [`CircuitBreaker`].
#[derive(Clone)]
pub struct CircuitBreakerSettings {
    name: String,
    max_requests: u32,
    interval: Duration,
    timeout: Duration,
    ready_to_trip: ReadyToTrip,
    on_state_change: Option<StateChangeHook>,
}

impl CircuitBreakerSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_requests: 1,
            interval: Duration::ZERO,
            timeout: DEFAULT_TIMEOUT,
            ready_to_trip: Arc::new(default_ready_to_trip),
            on_state_change: None,
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(config.name.clone())
            .with_max_requests(config.max_requests)
            .with_interval(Duration::from_secs(config.interval_secs))
            .with_timeout(Duration::from_secs(config.open_timeout_secs))
            .with_ready_to_trip_policy(threshold_trip(
                config.trip_consecutive_failures,
                config.trip_failure_ratio,
            ))
    }

    /// Trial calls admitted while half-open. 0 is treated as 1.
    pub fn with_max_requests(mut self, max_requests: u32) -> Self {
        self.max_requests = max_requests.max(1);
        self
    }

    /// Period after which closed-state counts are cleared. Zero never clears.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Time spent open before a trial call is let through. Zero means 60s.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = if timeout.is_zero() { DEFAULT_TIMEOUT } else { timeout };
        self
    }

    pub fn with_ready_to_trip<F>(self, f: F) -> Self
    where
        F: Fn(&Counts) -> bool + Send + Sync + 'static,
    {
        self.with_ready_to_trip_policy(Arc::new(f))
    }

    pub fn with_ready_to_trip_policy(mut self, policy: ReadyToTrip) -> Self {
        self.ready_to_trip = policy;
        self
    }

    pub fn with_on_state_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(f));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl fmt::Debug for CircuitBreakerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerSettings")
            .field("name", &self.name)
            .field("max_requests", &self.max_requests)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("on_state_change", &self.on_state_change.is_some())
            .finish_non_exhaustive()
    }
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The breaker is open; the call was not made.
    Open,
    /// The breaker is half-open and all trial slots are taken; the call was not made.
    TooManyRequests,
    /// The protected call ran and failed with this error.
    Inner(E),
}

impl<E> BreakerError<E> {
    /// True when the breaker refused the call rather than the call failing.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, BreakerError::Inner(_))
    }
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open => write!(f, "circuit breaker is open"),
            BreakerError::TooManyRequests => write!(f, "too many requests in half-open state"),
            BreakerError::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BreakerError::Inner(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    generation: u64,
    counts: Counts,
    /// Zero-valued (`None`) while half-open, or closed without an interval.
    expiry: Option<Instant>,
    /// Transitions not yet handed to the state-change hook.
    pending: Vec<(CircuitState, CircuitState)>,
}

/// A named three-state circuit breaker.
pub struct CircuitBreaker {
    settings: CircuitBreakerSettings,
    inner: Mutex<BreakerState>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(settings: CircuitBreakerSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: CircuitBreakerSettings, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let expiry = closed_expiry(settings.interval, now);
        metrics::record_breaker_state(&settings.name, CircuitState::Closed.as_u8());
        Self {
            settings,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry,
                pending: Vec::new(),
            }),
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &CircuitBreakerSettings {
        &self.settings
    }

    /// Current state, applying any transition that is due.
    pub fn state(&self) -> CircuitState {
        self.update(|inner, now| self.current_state(inner, now).0)
    }

    /// Counts of the current generation, applying any transition that is due.
    pub fn counts(&self) -> Counts {
        self.update(|inner, now| {
            self.current_state(inner, now);
            inner.counts
        })
    }

    /// Run `call` if the breaker admits it and record its outcome.
    ///
    /// `Ok` counts as success and `Err` as failure. If the returned future is
    /// dropped or the call panics, a failure is recorded before unwinding
    /// continues.
    pub async fn execute<F, Fut, T, E>(&self, call: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let generation = self.before_call().map_err(|refusal| match refusal {
            Refusal::Open => BreakerError::Open,
            Refusal::TooManyRequests => BreakerError::TooManyRequests,
        })?;

        let mut guard = CallGuard {
            breaker: self,
            generation,
            settled: false,
        };
        let result = call().await;
        guard.settle(result.is_ok());

        result.map_err(BreakerError::Inner)
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` under the lock, then report the transitions it caused.
    fn update<R>(&self, f: impl FnOnce(&mut BreakerState, Instant) -> R) -> R {
        let now = self.clock.now();
        let (result, transitions) = {
            let mut inner = self.lock();
            let result = f(&mut inner, now);
            (result, std::mem::take(&mut inner.pending))
        };
        self.notify(transitions);
        result
    }

    fn notify(&self, transitions: Vec<(CircuitState, CircuitState)>) {
        let Some(hook) = &self.settings.on_state_change else {
            return;
        };
        for (from, to) in transitions {
            // The hook may run from `CallGuard::drop` during unwinding, where a
            // second panic would abort.
            let called = panic::catch_unwind(AssertUnwindSafe(|| hook(&self.settings.name, from, to)));
            if called.is_err() {
                tracing::error!(
                    breaker = %self.settings.name,
                    from = %from,
                    to = %to,
                    "Circuit breaker state change hook panicked"
                );
            }
        }
    }

    fn before_call(&self) -> Result<u64, Refusal> {
        self.update(|inner, now| {
            let (state, generation) = self.current_state(inner, now);

            match state {
                CircuitState::Open => return Err(Refusal::Open),
                CircuitState::HalfOpen if inner.counts.requests >= self.settings.max_requests => {
                    return Err(Refusal::TooManyRequests)
                }
                _ => {}
            }

            inner.counts.on_request();
            Ok(generation)
        })
    }

    fn after_call(&self, before: u64, success: bool) {
        self.update(|inner, now| {
            let (state, generation) = self.current_state(inner, now);
            if generation != before {
                return;
            }

            if success {
                self.on_success(inner, state, now);
            } else {
                self.on_failure(inner, state, now);
            }
        })
    }

    fn on_success(&self, inner: &mut BreakerState, state: CircuitState, now: Instant) {
        match state {
            CircuitState::Closed => inner.counts.on_success(),
            CircuitState::HalfOpen => {
                inner.counts.on_success();
                if inner.counts.consecutive_successes >= self.settings.max_requests {
                    self.set_state(inner, CircuitState::Closed, now);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, inner: &mut BreakerState, state: CircuitState, now: Instant) {
        match state {
            CircuitState::Closed => {
                inner.counts.on_failure();
                if (self.settings.ready_to_trip)(&inner.counts) {
                    self.set_state(inner, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => self.set_state(inner, CircuitState::Open, now),
            CircuitState::Open => {}
        }
    }

    fn current_state(&self, inner: &mut BreakerState, now: Instant) -> (CircuitState, u64) {
        match inner.state {
            CircuitState::Closed => {
                if inner.expiry.is_some_and(|expiry| expiry <= now) {
                    self.new_generation(inner, now);
                }
            }
            CircuitState::Open => {
                if inner.expiry.is_some_and(|expiry| expiry <= now) {
                    self.set_state(inner, CircuitState::HalfOpen, now);
                }
            }
            CircuitState::HalfOpen => {}
        }
        (inner.state, inner.generation)
    }

    fn set_state(&self, inner: &mut BreakerState, to: CircuitState, now: Instant) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        self.new_generation(inner, now);

        tracing::warn!(
            breaker = %self.settings.name,
            from = %from,
            to = %to,
            "Circuit breaker state changed"
        );
        metrics::record_breaker_state(&self.settings.name, to.as_u8());
        if self.settings.on_state_change.is_some() {
            inner.pending.push((from, to));
        }
    }

    fn new_generation(&self, inner: &mut BreakerState, now: Instant) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.counts.clear();
        inner.expiry = match inner.state {
            CircuitState::Closed => closed_expiry(self.settings.interval, now),
            CircuitState::Open => Some(now + self.settings.timeout),
            CircuitState::HalfOpen => None,
        };
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("settings", &self.settings)
            .field("inner", &*self.lock())
            .finish()
    }
}

fn closed_expiry(interval: Duration, now: Instant) -> Option<Instant> {
    if interval.is_zero() {
        None
    } else {
        Some(now + interval)
    }
}

enum Refusal {
    Open,
    TooManyRequests,
}

/// Records the outcome of an admitted call exactly once, on every exit path.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl CallGuard<'_> {
    fn settle(&mut self, success: bool) {
        self.settled = true;
        self.breaker.after_call(self.generation, success);
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.after_call(self.generation, false);
        }
    }
}

/// Middleware guarding the rest of the chain with a breaker.
///
/// A 5xx response from downstream is a failure and is returned to the
/// caller unchanged.
pub async fn circuit_breaker_middleware(
    State(breaker): State<Arc<CircuitBreaker>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let outcome = breaker
        .execute(move || async move {
            let response = next.run(request).await;
            if response.status().is_server_error() {
                Err(response)
            } else {
                Ok(response)
            }
        })
        .await;

    match outcome {
        Ok(response) | Err(BreakerError::Inner(response)) => response,
        Err(BreakerError::Open) => {
            tracing::warn!(breaker = %breaker.name(), "Request rejected: circuit open");
            metrics::record_breaker_rejection(breaker.name());
            Rejection::CircuitOpen.into_response()
        }
        Err(BreakerError::TooManyRequests) => {
            tracing::warn!(breaker = %breaker.name(), "Request rejected: half-open trial slots taken");
            metrics::record_breaker_rejection(breaker.name());
            Rejection::HalfOpenSaturated.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{OnceLock, Weak};

    #[derive(Debug, PartialEq)]
    struct Boom;

    fn breaker(settings: CircuitBreakerSettings) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (CircuitBreaker::with_clock(settings, clock.clone()), clock)
    }

    fn consecutive_trip() -> CircuitBreakerSettings {
        CircuitBreakerSettings::new("test")
            .with_max_requests(2)
            .with_timeout(Duration::from_secs(30))
            .with_ready_to_trip(|c: &Counts| c.consecutive_failures > 4)
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), BreakerError<Boom>> {
        cb.execute(|| async { Err(Boom) }).await
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<(), BreakerError<Boom>> {
        cb.execute(|| async { Ok(()) }).await
    }

    #[test]
    fn test_default_predicate() {
        let mut counts = Counts::default();
        assert!(!default_ready_to_trip(&counts));

        counts.requests = 10;
        counts.total_failures = 5;
        counts.consecutive_failures = 4;
        assert!(!default_ready_to_trip(&counts));

        counts.consecutive_failures = 5;
        assert!(default_ready_to_trip(&counts));

        counts.consecutive_failures = 1;
        counts.total_failures = 6;
        assert!(default_ready_to_trip(&counts));
    }

    #[test]
    fn test_settings_defaults() {
        let settings = CircuitBreakerSettings::new("x")
            .with_max_requests(0)
            .with_timeout(Duration::ZERO);
        assert_eq!(settings.max_requests(), 1);
        assert_eq!(settings.timeout(), Duration::from_secs(60));
        assert_eq!(settings.interval(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_opens_after_five_consecutive_failures() {
        let (cb, _clock) = breaker(consecutive_trip());

        for _ in 0..4 {
            assert!(matches!(fail(&cb).await, Err(BreakerError::Inner(Boom))));
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        assert!(matches!(fail(&cb).await, Err(BreakerError::Inner(Boom))));
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.counts(), Counts::default());

        let calls = AtomicU32::new(0);
        let result: Result<(), BreakerError<Boom>> = cb
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Open)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let (cb, _clock) = breaker(consecutive_trip());
        for _ in 0..4 {
            let _ = fail(&cb).await;
        }
        succeed(&cb).await.unwrap();
        for _ in 0..4 {
            let _ = fail(&cb).await;
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        let counts = cb.counts();
        assert_eq!(counts.requests, 9);
        assert_eq!(counts.total_failures, 8);
        assert_eq!(counts.total_successes, 1);
        assert_eq!(counts.consecutive_failures, 4);
        assert_eq!(counts.consecutive_successes, 0);
    }

    #[tokio::test]
    async fn test_half_open_closes_after_max_requests_successes() {
        let (cb, clock) = breaker(consecutive_trip());
        for _ in 0..5 {
            let _ = fail(&cb).await;
        }
        clock.advance(Duration::from_secs(29));
        assert!(matches!(succeed(&cb).await, Err(BreakerError::Open)));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.counts(), Counts::default());
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_with_fresh_timeout() {
        let (cb, clock) = breaker(consecutive_trip());
        for _ in 0..5 {
            let _ = fail(&cb).await;
        }
        clock.advance(Duration::from_secs(30));

        assert!(matches!(fail(&cb).await, Err(BreakerError::Inner(Boom))));
        assert_eq!(cb.state(), CircuitState::Open);

        // The open period restarted at the half-open failure.
        clock.advance(Duration::from_secs(29));
        assert_eq!(cb.state(), CircuitState::Open);
        clock.advance(Duration::from_secs(1));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_stays_open_without_traffic() {
        let (cb, clock) = breaker(consecutive_trip());
        for _ in 0..5 {
            let _ = fail(&cb).await;
        }
        clock.advance(Duration::from_secs(3600));
        // Transition is applied lazily on observation, never by a timer.
        assert_eq!(cb.inner.lock().unwrap().state, CircuitState::Open);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_half_open_limits_trial_calls() {
        let settings = consecutive_trip().with_max_requests(1);
        let (cb, clock) = breaker(settings);
        let cb = Arc::new(cb);
        for _ in 0..5 {
            let _ = fail(&cb).await;
        }
        clock.advance(Duration::from_secs(30));

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial = {
            let cb = cb.clone();
            tokio::spawn(async move {
                cb.execute(|| async move {
                    let _ = release_rx.await;
                    Ok::<_, Boom>(())
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(matches!(succeed(&cb).await, Err(BreakerError::TooManyRequests)));

        release_tx.send(()).unwrap();
        trial.await.unwrap().unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_interval_clears_closed_counts() {
        let settings = consecutive_trip().with_interval(Duration::from_secs(60));
        let (cb, clock) = breaker(settings);
        for _ in 0..4 {
            let _ = fail(&cb).await;
        }
        assert_eq!(cb.counts().consecutive_failures, 4);

        clock.advance(Duration::from_secs(60));
        assert_eq!(cb.counts(), Counts::default());

        // A fresh window needs five more failures to trip.
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_default_ratio_trips_on_first_failure() {
        let (cb, _clock) = breaker(CircuitBreakerSettings::new("ratio"));
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_panicking_call_counts_as_failure() {
        let (cb, _clock) = breaker(consecutive_trip());

        let result = std::panic::AssertUnwindSafe(cb.execute(|| async {
            if true {
                panic!("boom");
            }
            Ok::<(), Boom>(())
        }))
        .catch_unwind()
        .await;
        assert!(result.is_err());

        let counts = cb.counts();
        assert_eq!(counts.requests, 1);
        assert_eq!(counts.total_failures, 1);
    }

    #[tokio::test]
    async fn test_dropped_call_counts_as_failure() {
        let (cb, _clock) = breaker(consecutive_trip());

        let result = tokio::time::timeout(
            Duration::from_millis(10),
            cb.execute(|| std::future::pending::<Result<(), Boom>>()),
        )
        .await;
        assert!(result.is_err());

        let counts = cb.counts();
        assert_eq!(counts.requests, 1);
        assert_eq!(counts.total_failures, 1);
    }

    #[tokio::test]
    async fn test_stale_generation_outcome_is_ignored() {
        let settings = consecutive_trip().with_interval(Duration::from_secs(10));
        let (cb, clock) = breaker(settings);

        let result = cb
            .execute(|| async {
                clock.advance(Duration::from_secs(10));
                Err::<(), _>(Boom)
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Inner(Boom))));
        assert_eq!(cb.counts(), Counts::default());
    }

    #[tokio::test]
    async fn test_state_change_hook_sees_every_transition() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let settings = consecutive_trip()
            .with_max_requests(1)
            .with_on_state_change(move |_, from, to| sink.lock().unwrap().push((from, to)));
        let (cb, clock) = breaker(settings);

        for _ in 0..5 {
            let _ = fail(&cb).await;
        }
        clock.advance(Duration::from_secs(30));
        succeed(&cb).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[tokio::test]
    async fn test_hook_may_read_breaker_state() {
        let slot: Arc<OnceLock<Weak<CircuitBreaker>>> = Arc::new(OnceLock::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (hook_slot, sink) = (slot.clone(), seen.clone());
        let settings = CircuitBreakerSettings::new("reentrant")
            .with_ready_to_trip(|c: &Counts| c.consecutive_failures >= 1)
            .with_on_state_change(move |_, _, to| {
                if let Some(cb) = hook_slot.get().and_then(Weak::upgrade) {
                    sink.lock().unwrap().push((to, cb.state()));
                }
            });
        let cb = Arc::new(CircuitBreaker::with_clock(settings, Arc::new(ManualClock::new())));
        slot.set(Arc::downgrade(&cb)).unwrap();

        let _ = fail(&cb).await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(CircuitState::Open, CircuitState::Open)]
        );
    }

    #[tokio::test]
    async fn test_panicking_hook_during_unwind_is_contained() {
        let settings = CircuitBreakerSettings::new("loud")
            .with_ready_to_trip(|c: &Counts| c.consecutive_failures >= 1)
            .with_on_state_change(|_, _, _| panic!("hook failed"));
        let (cb, _clock) = breaker(settings);

        let result = std::panic::AssertUnwindSafe(cb.execute(|| async {
            if true {
                panic!("call failed");
            }
            Ok::<(), Boom>(())
        }))
        .catch_unwind()
        .await;
        assert!(result.is_err());

        // The transition still happened and the breaker stays usable.
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(succeed(&cb).await, Err(BreakerError::Open)));
    }

    #[test]
    fn test_error_display() {
        let open: BreakerError<std::io::Error> = BreakerError::Open;
        assert_eq!(open.to_string(), "circuit breaker is open");
        assert!(open.is_rejection());

        let inner = BreakerError::Inner(std::io::Error::new(std::io::ErrorKind::Other, "db down"));
        assert_eq!(inner.to_string(), "db down");
        assert!(!inner.is_rejection());
    }
}
