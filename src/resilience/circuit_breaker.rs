//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: requests pass through, consecutive failures are counted
//! - Open: requests fail fast without reaching the network
//! - Half-Open: a bounded number of probes test whether the upstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open:       consecutive_failures >= threshold
//! Open → Half-Open:    open_timeout elapsed (checked lazily on access)
//! Half-Open → Closed:  a probe succeeds
//! Half-Open → Open:    a probe fails (timer restarts)
//! ```
//!
//! # Design Decisions
//! - One breaker per client, shared by every clone through an `Arc`
//! - The lock is held only around admission and bookkeeping, never across I/O
//! - Every transition starts a new generation; late outcomes from an older
//!   generation are dropped so they cannot flip the new state
//! - Admission hands out an RAII [`Permit`]; dropping it unsettled (a cancelled
//!   call) frees the half-open slot without recording an outcome

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use futures_util::future::BoxFuture;
use tokio::time::Instant;
use tower::{Layer, Service};

use crate::config::schema::CircuitBreakerConfig;
use crate::error::{Error, FailedResponse};
use crate::observability::metrics::Stats;

const DEFAULT_CONSECUTIVE_FAILURES: u32 = 2;
const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(60);

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half-open",
        })
    }
}

/// Outcome counters of the current generation.
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
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSettings {
    /// Name used in logs, errors and metric labels.
    pub name: String,
    /// Consecutive failures that open the breaker.
    pub consecutive_failures: u32,
    /// Time spent open before probing.
    pub open_timeout: Duration,
    /// Concurrent probes admitted while half-open.
    pub max_requests: u32,
    /// Responses with a status at or above this count as failures.
    pub failure_status: StatusCode,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            name: "http-client".to_string(),
            consecutive_failures: DEFAULT_CONSECUTIVE_FAILURES,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            max_requests: 1,
            failure_status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl BreakerSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn from_config(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            consecutive_failures: config.consecutive_failures,
            open_timeout: Duration::from_millis(config.open_timeout_ms),
            max_requests: config.max_requests,
            failure_status: StatusCode::from_u16(config.failure_status_code)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    pub fn with_consecutive_failures(mut self, threshold: u32) -> Self {
        self.consecutive_failures = threshold;
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn with_max_requests(mut self, max_requests: u32) -> Self {
        self.max_requests = max_requests;
        self
    }

    pub fn with_failure_status(mut self, status: StatusCode) -> Self {
        self.failure_status = status;
        self
    }

    /// Zero values fall back to the defaults.
    fn normalized(mut self) -> Self {
        if self.consecutive_failures == 0 {
            self.consecutive_failures = DEFAULT_CONSECUTIVE_FAILURES;
        }
        if self.open_timeout.is_zero() {
            self.open_timeout = DEFAULT_OPEN_TIMEOUT;
        }
        self.max_requests = self.max_requests.max(1);
        self
    }
}

/// Why a call was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Open,
    TooManyRequests,
}

impl Rejection {
    fn into_error(self, name: &str) -> Error {
        let name = name.to_string();
        match self {
            Rejection::Open => Error::CircuitOpen { name },
            Rejection::TooManyRequests => Error::TooManyRequests { name },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Closed,
    Open { until: Instant },
    HalfOpen { in_flight: u32 },
}

impl Phase {
    fn state(&self) -> State {
        match self {
            Phase::Closed => State::Closed,
            Phase::Open { .. } => State::Open,
            Phase::HalfOpen { .. } => State::HalfOpen,
        }
    }
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    counts: Counts,
    generation: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    settings: BreakerSettings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings: settings.normalized(),
            inner: Mutex::new(Inner {
                phase: Phase::Closed,
                counts: Counts::default(),
                generation: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    pub fn state(&self) -> State {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());
        inner.phase.state()
    }

    pub fn counts(&self) -> Counts {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());
        inner.counts
    }

    /// Whether `status` counts as a failed call.
    pub fn is_failure_status(&self, status: StatusCode) -> bool {
        status >= self.settings.failure_status
    }

    /// Force the breaker closed and clear its counters.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let from = inner.phase.state();
        inner.phase = Phase::Closed;
        inner.counts = Counts::default();
        inner.generation += 1;
        tracing::info!(breaker = %self.settings.name, from = %from, "circuit breaker reset");
    }

    /// Admit one call or reject it.
    pub fn try_acquire(self: &Arc<Self>) -> Result<Permit, Rejection> {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());

        match &mut inner.phase {
            Phase::Closed => {}
            Phase::Open { .. } => return Err(Rejection::Open),
            Phase::HalfOpen { in_flight } => {
                if *in_flight >= self.settings.max_requests {
                    return Err(Rejection::TooManyRequests);
                }
                *in_flight += 1;
            }
        }
        inner.counts.on_request();

        Ok(Permit {
            breaker: Arc::clone(self),
            generation: inner.generation,
            settled: false,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh(&self, inner: &mut Inner, now: Instant) {
        if let Phase::Open { until } = inner.phase {
            if now >= until {
                self.transition(inner, Phase::HalfOpen { in_flight: 0 });
            }
        }
    }

    fn complete(&self, generation: u64, outcome: Option<bool>) {
        let now = Instant::now();
        let mut inner = self.lock();
        self.refresh(&mut inner, now);
        if inner.generation != generation {
            return;
        }

        if let Phase::HalfOpen { in_flight } = &mut inner.phase {
            *in_flight = in_flight.saturating_sub(1);
        }

        match outcome {
            Some(true) => {
                inner.counts.on_success();
                if inner.phase.state() == State::HalfOpen {
                    self.transition(&mut inner, Phase::Closed);
                }
            }
            Some(false) => {
                inner.counts.on_failure();
                let trip = match inner.phase {
                    Phase::Closed => {
                        inner.counts.consecutive_failures >= self.settings.consecutive_failures
                    }
                    Phase::HalfOpen { .. } => true,
                    Phase::Open { .. } => false,
                };
                if trip {
                    let until = now + self.settings.open_timeout;
                    self.transition(&mut inner, Phase::Open { until });
                }
            }
            None => {}
        }
    }

    fn transition(&self, inner: &mut Inner, to: Phase) {
        let from = inner.phase.state();
        inner.phase = to;
        inner.counts = Counts::default();
        inner.generation += 1;

        match to {
            Phase::Open { .. } => tracing::warn!(
                breaker = %self.settings.name,
                from = %from,
                to = %to.state(),
                open_for_ms = self.settings.open_timeout.as_millis() as u64,
                "circuit breaker opened"
            ),
            _ => tracing::info!(
                breaker = %self.settings.name,
                from = %from,
                to = %to.state(),
                "circuit breaker state changed"
            ),
        }
    }
}

/// Admission ticket for one call.
#[derive(Debug)]
#[must_use = "an unsettled permit records no outcome"]
pub struct Permit {
    breaker: Arc<CircuitBreaker>,
    generation: u64,
    settled: bool,
}

impl Permit {
    pub fn success(mut self) {
        self.settle(Some(true));
    }

    pub fn failure(mut self) {
        self.settle(Some(false));
    }

    fn settle(&mut self, outcome: Option<bool>) {
        self.settled = true;
        self.breaker.complete(self.generation, outcome);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.settled {
            self.settle(None);
        }
    }
}

/// Wraps a sender with [`CircuitBreakerService`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerLayer {
    breaker: Arc<CircuitBreaker>,
    stats: Stats,
}

impl CircuitBreakerLayer {
    pub fn new(breaker: Arc<CircuitBreaker>, stats: Stats) -> Self {
        Self { breaker, stats }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

impl<S> Layer<S> for CircuitBreakerLayer {
    type Service = CircuitBreakerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CircuitBreakerService {
            inner,
            breaker: self.breaker.clone(),
            stats: self.stats.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerService<S> {
    inner: S,
    breaker: Arc<CircuitBreaker>,
    stats: Stats,
}

impl<S> CircuitBreakerService<S> {
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

impl<S> Service<Request<Body>> for CircuitBreakerService<S>
where
    S: Service<Request<Body>, Response = Response<Body>, Error = Error>,
    S::Future: Send + 'static,
{
    type Response = Response<Body>;
    type Error = Error;
    type Future = BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let permit = match self.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(rejection) => {
                match rejection {
                    Rejection::Open => self.stats.record_breaker_open(),
                    Rejection::TooManyRequests => self.stats.record_breaker_too_many_requests(),
                }
                tracing::debug!(
                    breaker = %self.breaker.name(),
                    uri = %request.uri(),
                    ?rejection,
                    "request rejected by circuit breaker"
                );
                let err = rejection.into_error(self.breaker.name());
                return Box::pin(async move { Err(err) });
            }
        };

        let breaker = self.breaker.clone();
        let call = self.inner.call(request);

        Box::pin(async move {
            match call.await {
                Ok(response) if breaker.is_failure_status(response.status()) => {
                    permit.failure();
                    let failed = FailedResponse::new(response, 1);
                    Err(Error::UnexpectedStatus(Box::new(failed)))
                }
                Ok(response) => {
                    permit.success();
                    Ok(response)
                }
                Err(Error::UnexpectedStatus(failed)) => {
                    if breaker.is_failure_status(failed.status) {
                        permit.failure();
                    } else {
                        permit.success();
                    }
                    Err(Error::UnexpectedStatus(failed))
                }
                // Never reached the upstream.
                Err(
                    err @ (Error::Cancelled
                    | Error::Body(_)
                    | Error::InvalidRequest(_)
                    | Error::Config(_)),
                ) => {
                    drop(permit);
                    Err(err)
                }
                Err(err) => {
                    permit.failure();
                    Err(err)
                }
            }
        })
    }
}
