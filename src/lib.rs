//! Resilient outbound HTTP client library.
//!
//! Wraps a pooled hyper transport in tower layers: a circuit breaker,
//! retry with exponential backoff and `Retry-After` support, per-call
//! deadlines and cancellation, plus tracing spans and metrics.

pub mod config;
pub mod error;
pub mod http;
pub mod observability;
pub mod resilience;

pub use config::schema::ClientConfig;
pub use error::{Error, ErrorKind, FailedResponse, TransportError, TransportErrorKind};
pub use http::{HttpClient, HttpClientBuilder};
