//! Deadlines and cancellation.
//!
//! A request carries its limits as extensions: a [`Deadline`] and/or a
//! [`CancellationToken`]. [`CallContext`] races every blocking point of the
//! pipeline (network send, backoff sleep, body drain) against them, so a
//! cancelled call returns promptly and stops retrying.

use std::future::Future;
use std::time::Duration;

use axum::http::Request;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Absolute point in time after which a request is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn has_elapsed(&self) -> bool {
        Instant::now() >= self.0
    }
}

/// Limits of one call, read once from the request.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: Option<CancellationToken>,
    deadline: Option<Deadline>,
}

impl CallContext {
    pub fn new(cancel: Option<CancellationToken>, deadline: Option<Deadline>) -> Self {
        Self { cancel, deadline }
    }

    pub fn from_request<B>(request: &Request<B>) -> Self {
        Self {
            cancel: request.extensions().get::<CancellationToken>().cloned(),
            deadline: request.extensions().get::<Deadline>().copied(),
        }
    }

    pub fn deadline(&self) -> Option<Deadline> {
        self.deadline
    }

    /// Run `fut` unless the call is cancelled or its deadline passes first.
    pub async fn guard<F, T>(&self, fut: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        let cancelled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline.instant()).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(Error::Cancelled),
            _ = expired => Err(Error::DeadlineExceeded),
            result = fut => result,
        }
    }

    /// Sleep for `delay` on the calling task.
    pub async fn sleep(&self, delay: Duration) -> Result<(), Error> {
        self.guard(async {
            tokio::time::sleep(delay).await;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn guard_passes_through() {
        let ctx = CallContext::default();
        let out = ctx.guard(async { Ok::<_, Error>(7) }).await.unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_sleep() {
        let ctx = CallContext::new(None, Some(Deadline::after(Duration::from_millis(100))));
        let start = Instant::now();

        let err = ctx.sleep(Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded));
        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_wins() {
        let token = CancellationToken::new();
        let ctx = CallContext::new(Some(token.clone()), None);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let err = ctx.sleep(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn reads_limits_from_extensions() {
        let token = CancellationToken::new();
        let deadline = Deadline::at(Instant::now());
        let request = Request::builder()
            .extension(token)
            .extension(deadline)
            .body(())
            .unwrap();

        let ctx = CallContext::from_request(&request);
        assert_eq!(ctx.deadline(), Some(deadline));
        assert!(ctx.cancel.is_some());
    }
}
