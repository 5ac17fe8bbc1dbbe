//! Retry layer.
//!
//! # Responsibilities
//! - Snapshot the request body once and replay it byte-for-byte per attempt
//! - Retry transient transport errors and retryable statuses with backoff
//! - Drain discarded responses so their connections return to the pool
//! - Record the whole call (attempts plus sleeps) in the duration histogram
//!
//! # Design Decisions
//! - Every method is retried, including POST: the body snapshot makes replay
//!   safe at the transport level and idempotency is the caller's concern
//! - A server `Retry-After` replaces the exponential delay and is never jittered
//! - Exhausting retries on a failing status yields [`Error::UnexpectedStatus`],
//!   so the breaker above sees one failure per call rather than per attempt

use std::mem;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use futures_util::future::BoxFuture;
use tokio::time::Instant;
use tower::{Layer, Service, ServiceExt};

use super::backoff;
use super::classify::{is_retryable_status, should_retry};
use super::timeouts::CallContext;
use crate::config::schema::RetryConfig;
use crate::error::{Error, FailedResponse};
use crate::http::body::{drain_body, ReplayableRequest};
use crate::observability::metrics::Stats;

/// Retry budget and backoff bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first send; `0` sends exactly once.
    pub max_retries: u32,
    pub wait_min: Duration,
    pub wait_max: Duration,
    /// Fraction of the exponential delay added as random jitter, in `[0, 1]`.
    pub jitter: f64,
    /// Largest request body buffered for replay.
    pub max_body_bytes: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            wait_min: Duration::from_millis(50),
            wait_max: Duration::from_secs(1),
            jitter: 0.0,
            max_body_bytes: usize::MAX,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_wait(mut self, min: Duration, max: Duration) -> Self {
        self.wait_min = min;
        self.wait_max = max;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Delay before retry number `attempt` (0-based), given the response
    /// that triggered it.
    pub fn delay(&self, attempt: u32, response: Option<&Response<Body>>) -> Duration {
        match backoff::retry_after_override(response, SystemTime::now()) {
            Some(server) => server,
            None => backoff::jittered(
                backoff::exponential(self.wait_min, self.wait_max, attempt),
                self.jitter,
            ),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            wait_min: Duration::from_millis(config.wait_min_ms),
            wait_max: Duration::from_millis(config.wait_max_ms),
            jitter: config.jitter,
            max_body_bytes: config.max_body_bytes.unwrap_or(usize::MAX),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    RetryableFailure,
    TerminalFailure,
}

/// One send made by the retry layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub index: u32,
    pub elapsed: Duration,
    pub outcome: AttemptOutcome,
    pub status: Option<StatusCode>,
}

/// Response extension listing every attempt of the call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attempts(pub Vec<Attempt>);

impl Attempts {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attempt> {
        self.0.iter()
    }

    pub fn last(&self) -> Option<&Attempt> {
        self.0.last()
    }
}

/// Wraps a sender with [`Retry`].
#[derive(Debug, Clone)]
pub struct RetryLayer {
    policy: Arc<RetryPolicy>,
    stats: Stats,
}

impl RetryLayer {
    pub fn new(policy: RetryPolicy, stats: Stats) -> Self {
        Self {
            policy: Arc::new(policy),
            stats,
        }
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = Retry<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Retry {
            inner,
            policy: self.policy.clone(),
            stats: self.stats.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Retry<S> {
    inner: S,
    policy: Arc<RetryPolicy>,
    stats: Stats,
}

impl<S> Retry<S> {
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl<S> Service<Request<Body>> for Retry<S>
where
    S: Service<Request<Body>, Response = Response<Body>, Error = Error> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<Body>;
    type Error = Error;
    type Future = BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        // Keep the service that was driven to readiness.
        let clone = self.inner.clone();
        let inner = mem::replace(&mut self.inner, clone);
        let policy = self.policy.clone();
        let stats = self.stats.clone();

        Box::pin(async move {
            let started = Instant::now();
            let result = execute(inner, &policy, &stats, request).await;
            stats.record_duration(started.elapsed());
            result
        })
    }
}

async fn execute<S>(
    mut inner: S,
    policy: &RetryPolicy,
    stats: &Stats,
    request: Request<Body>,
) -> Result<Response<Body>, Error>
where
    S: Service<Request<Body>, Response = Response<Body>, Error = Error>,
{
    let ctx = CallContext::from_request(&request);
    let replay = ctx
        .guard(ReplayableRequest::capture(request, policy.max_body_bytes))
        .await?;

    let mut log = Vec::with_capacity(1);
    let mut retries = 0u32;
    let mut result = send(&mut inner, &ctx, &replay, 0, &mut log).await;

    while should_retry(&result) && retries < policy.max_retries {
        stats.record_retry();
        let delay = policy.delay(retries, result.as_ref().ok());
        tracing::debug!(
            method = %replay.method(),
            uri = %replay.uri(),
            retry = retries + 1,
            delay_ms = delay.as_millis() as u64,
            "retrying request"
        );
        ctx.sleep(delay).await?;

        if let Ok(previous) = result {
            ctx.guard(async {
                drain_body(previous).await;
                Ok(())
            })
            .await?;
        }

        retries += 1;
        result = send(&mut inner, &ctx, &replay, retries, &mut log).await;
    }

    let attempts = retries + 1;
    match result {
        Ok(response) if is_retryable_status(response.status()) => {
            tracing::warn!(
                method = %replay.method(),
                uri = %replay.uri(),
                status = response.status().as_u16(),
                attempts,
                "giving up on failing status"
            );
            let failed = FailedResponse::new(response, attempts);
            Err(Error::UnexpectedStatus(Box::new(failed)))
        }
        Ok(mut response) => {
            response.extensions_mut().insert(Attempts(log));
            Ok(response)
        }
        Err(err) => {
            if err.is_retryable() {
                tracing::warn!(
                    method = %replay.method(),
                    uri = %replay.uri(),
                    attempts,
                    error = %err,
                    "giving up on transport error"
                );
            }
            Err(err.with_attempts(attempts))
        }
    }
}

async fn send<S>(
    inner: &mut S,
    ctx: &CallContext,
    replay: &ReplayableRequest,
    index: u32,
    log: &mut Vec<Attempt>,
) -> Result<Response<Body>, Error>
where
    S: Service<Request<Body>, Response = Response<Body>, Error = Error>,
{
    let started = Instant::now();
    let result = ctx
        .guard(async { inner.ready().await?.call(replay.build()).await })
        .await;

    let status = result.as_ref().ok().map(|r| r.status());
    let outcome = match &result {
        Ok(response) if is_retryable_status(response.status()) => AttemptOutcome::RetryableFailure,
        Ok(response) if response.status().is_server_error() => AttemptOutcome::TerminalFailure,
        Ok(_) => AttemptOutcome::Success,
        Err(err) if err.is_retryable() => AttemptOutcome::RetryableFailure,
        Err(_) => AttemptOutcome::TerminalFailure,
    };
    let attempt = Attempt {
        index,
        elapsed: started.elapsed(),
        outcome,
        status,
    };

    match &result {
        Ok(_) => tracing::debug!(
            attempt = attempt.index,
            elapsed_ms = attempt.elapsed.as_millis() as u64,
            outcome = ?attempt.outcome,
            status = ?attempt.status,
            "attempt finished"
        ),
        Err(err) => tracing::debug!(
            attempt = attempt.index,
            elapsed_ms = attempt.elapsed.as_millis() as u64,
            outcome = ?attempt.outcome,
            error = %err,
            "attempt failed"
        ),
    }

    log.push(attempt);
    result
}
