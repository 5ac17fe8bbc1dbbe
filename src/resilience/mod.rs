//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound request:
//!     → circuit_breaker.rs (admit, or reject fast while open)
//!     → retries.rs (snapshot body, send, classify, back off, resend)
//!         → classify.rs (retryable vs. terminal)
//!         → backoff.rs (exponential delay or server Retry-After)
//!         → timeouts.rs (every wait races the deadline and cancellation token)
//!     → base transport
//! ```
//!
//! # Design Decisions
//! - Each concern is a tower `Layer`, composed by `http::client`
//! - The breaker sits outside the retry loop, so one call is one outcome
//! - Backoff is a pure function, kept apart from sleeping and cancellation

pub mod backoff;
pub mod circuit_breaker;
pub mod classify;
pub mod retries;
pub mod timeouts;

pub use backoff::backoff;
pub use circuit_breaker::{
    BreakerSettings, CircuitBreaker, CircuitBreakerLayer, CircuitBreakerService, Counts, Permit,
    Rejection, State,
};
pub use classify::should_retry;
pub use retries::{Attempt, AttemptOutcome, Attempts, Retry, RetryLayer, RetryPolicy};
pub use timeouts::{CallContext, Deadline};
