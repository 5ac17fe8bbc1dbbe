//! Error types for the outbound pipeline.
//!
//! Every failure the pipeline can produce is a variant of [`Error`]. Callers
//! branch on [`Error::kind`] (or match the enum directly) instead of parsing
//! messages; the `Display` output layers human context on top.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use axum::body::Body;
use axum::http::{Extensions, HeaderMap, Response, StatusCode, Version};
use thiserror::Error;

use crate::config::ConfigError;
use crate::resilience::retries::Attempts;

/// Boxed error used as the source of transport failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Category of a failure raised by the base transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// Connection could not be established or was reset.
    Connect,
    /// An I/O or protocol timeout fired inside the transport.
    Timeout,
    /// Redirect limit exhausted.
    TooManyRedirects,
    /// URL scheme the transport cannot speak.
    UnsupportedScheme,
    /// Request head rejected as malformed.
    InvalidHeader,
    /// URL is not absolute or otherwise unusable.
    InvalidUrl,
    /// TLS certificate was not trusted or failed verification.
    Certificate,
    /// Anything else (closed connection, malformed response, ...).
    Other,
}

impl TransportErrorKind {
    /// Terminal failures are surfaced immediately and never retried.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransportErrorKind::TooManyRedirects
                | TransportErrorKind::UnsupportedScheme
                | TransportErrorKind::InvalidHeader
                | TransportErrorKind::InvalidUrl
                | TransportErrorKind::Certificate
        )
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TransportErrorKind::Connect => "connection failed",
            TransportErrorKind::Timeout => "timed out",
            TransportErrorKind::TooManyRedirects => "too many redirects",
            TransportErrorKind::UnsupportedScheme => "unsupported URL scheme",
            TransportErrorKind::InvalidHeader => "invalid header",
            TransportErrorKind::InvalidUrl => "invalid URL",
            TransportErrorKind::Certificate => "certificate verification failed",
            TransportErrorKind::Other => "transport error",
        };
        f.write_str(text)
    }
}

/// A classified failure from the base transport.
#[derive(Debug, Error)]
#[error("{kind}: {source}")]
pub struct TransportError {
    kind: TransportErrorKind,
    #[source]
    source: BoxError,
}

impl TransportError {
    /// Wrap `source` with an explicit classification.
    pub fn new(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    /// Wrap `source`, classifying it by inspecting its error chain.
    pub fn classify(source: impl Into<BoxError>) -> Self {
        let source = source.into();
        let kind = crate::resilience::classify::classify_transport_error(source.as_ref());
        Self { kind, source }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

/// Last response of a call that ended on an unexpected status.
///
/// Owns the whole response; its body has not been read. The body sits behind
/// a mutex so [`Error`] stays `Sync`.
pub struct FailedResponse {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    /// Number of sends that were made before giving up.
    pub attempts: u32,
    extensions: Extensions,
    body: Mutex<Option<Body>>,
}

impl FailedResponse {
    /// Take ownership of `response`. An [`Attempts`] log on it overrides `attempts`.
    pub fn new(response: Response<Body>, attempts: u32) -> Self {
        let (parts, body) = response.into_parts();
        let attempts = parts
            .extensions
            .get::<Attempts>()
            .map_or(attempts, |log| log.len() as u32);
        Self {
            status: parts.status,
            version: parts.version,
            headers: parts.headers,
            attempts,
            extensions: parts.extensions,
            body: Mutex::new(Some(body)),
        }
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Take the response body, leaving an empty one behind.
    pub fn take_body(&self) -> Body {
        self.body
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_else(Body::empty)
    }

    /// Reassemble the response. The body is empty if it was already taken.
    pub fn into_response(self) -> Response<Body> {
        let body = self
            .body
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .unwrap_or_else(Body::empty);
        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.version_mut() = self.version;
        *response.headers_mut() = self.headers;
        *response.extensions_mut() = self.extensions;
        response
    }
}

impl fmt::Debug for FailedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailedResponse")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

/// Coarse category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    UnexpectedStatus,
    CircuitOpen,
    TooManyRequests,
    Cancelled,
    DeadlineExceeded,
    Body,
    InvalidRequest,
    Config,
}

/// Errors returned by the pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport failed on the final attempt.
    #[error("transport failed after {attempts} attempt(s): {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// The final response carried a failing status code.
    #[error("unexpected HTTP status {} after {} attempt(s)", .0.status, .0.attempts)]
    UnexpectedStatus(Box<FailedResponse>),

    /// Rejected without sending: the circuit breaker is open.
    #[error("circuit breaker '{name}' is open")]
    CircuitOpen { name: String },

    /// Rejected without sending: the half-open probe budget is in use.
    #[error("circuit breaker '{name}' is half-open: too many requests")]
    TooManyRequests { name: String },

    /// The caller's cancellation token fired.
    #[error("request cancelled")]
    Cancelled,

    /// The request deadline elapsed.
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// The request body could not be buffered for replay.
    #[error("failed to buffer request body: {0}")]
    Body(#[source] BoxError),

    /// The request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] axum::http::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// Transport failure on a single send.
    pub fn transport(source: TransportError) -> Self {
        Error::Transport {
            attempts: 1,
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport { .. } => ErrorKind::Transport,
            Error::UnexpectedStatus(_) => ErrorKind::UnexpectedStatus,
            Error::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Error::TooManyRequests { .. } => ErrorKind::TooManyRequests,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Error::Body(_) => ErrorKind::Body,
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// Classification of the underlying transport failure, if any.
    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Error::Transport { source, .. } => Some(source.kind()),
            _ => None,
        }
    }

    /// Status of the last response for [`Error::UnexpectedStatus`].
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::UnexpectedStatus(failed) => Some(failed.status),
            _ => None,
        }
    }

    /// Whether a retry layer may replay the request after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport { source, .. } => !source.is_terminal(),
            _ => false,
        }
    }

    /// Whether the request was rejected by a circuit breaker without being sent.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::CircuitOpen { .. } | Error::TooManyRequests { .. })
    }

    pub(crate) fn with_attempts(self, attempts: u32) -> Self {
        match self {
            Error::Transport { source, .. } => Error::Transport { attempts, source },
            other => other,
        }
    }
}
