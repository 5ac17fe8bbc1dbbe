//! Retryable vs. terminal failure classification.
//!
//! Transport errors are classified by walking their source chain and
//! downcasting to the concrete hyper, hyper-util, rustls and I/O error types;
//! message text is never inspected.

use std::error::Error as StdError;
use std::io;

use axum::body::Body;
use axum::http::{header, uri, Response, StatusCode};

use crate::error::{Error, TransportErrorKind};

/// Whether the outcome of one attempt should be retried.
pub fn should_retry(result: &Result<Response<Body>, Error>) -> bool {
    match result {
        Ok(response) => is_retryable_status(response.status()),
        Err(err) => err.is_retryable(),
    }
}

/// Server errors are retried, except 501 which will not change on replay.
/// Codes outside the defined 1xx-5xx classes are treated as malformed and
/// retried too.
pub fn is_retryable_status(status: StatusCode) -> bool {
    let code = status.as_u16();
    if status == StatusCode::NOT_IMPLEMENTED {
        return false;
    }
    code >= 500 || code < 100
}

/// Classify a transport error by its most specific cause.
///
/// A terminal cause anywhere in the chain wins over a retryable one, so a
/// certificate failure reported through a connect error stays terminal.
pub fn classify_transport_error(err: &(dyn StdError + 'static)) -> TransportErrorKind {
    let mut found = TransportErrorKind::Other;
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(kind) = classify_link(e) {
            if kind.is_terminal() {
                return kind;
            }
            if found == TransportErrorKind::Other {
                found = kind;
            }
        }
        current = e.source();
    }
    found
}

fn classify_link(e: &(dyn StdError + 'static)) -> Option<TransportErrorKind> {
    if let Some(err) = e.downcast_ref::<rustls::Error>() {
        return match err {
            rustls::Error::InvalidCertificate(_) | rustls::Error::NoCertificatesPresented => {
                Some(TransportErrorKind::Certificate)
            }
            _ => None,
        };
    }

    if let Some(err) = e.downcast_ref::<io::Error>() {
        // Custom io errors hide their payload from `source()`.
        if let Some(inner) = err.get_ref() {
            let kind = classify_transport_error(inner);
            if kind != TransportErrorKind::Other {
                return Some(kind);
            }
        }
        return match err.kind() {
            io::ErrorKind::TimedOut => Some(TransportErrorKind::Timeout),
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::AddrNotAvailable => Some(TransportErrorKind::Connect),
            _ => None,
        };
    }

    if let Some(err) = e.downcast_ref::<hyper::Error>() {
        if err.is_timeout() {
            return Some(TransportErrorKind::Timeout);
        }
        // User errors mean hyper refused to encode the request head.
        if err.is_user() {
            return Some(TransportErrorKind::InvalidHeader);
        }
        return None;
    }

    if let Some(err) = e.downcast_ref::<hyper_util::client::legacy::Error>() {
        if err.is_connect() {
            return Some(TransportErrorKind::Connect);
        }
        return None;
    }

    if e.is::<header::InvalidHeaderName>() || e.is::<header::InvalidHeaderValue>() {
        return Some(TransportErrorKind::InvalidHeader);
    }
    if e.is::<uri::InvalidUri>() || e.is::<uri::InvalidUriParts>() {
        return Some(TransportErrorKind::InvalidUrl);
    }
    if e.is::<tokio::time::error::Elapsed>() {
        return Some(TransportErrorKind::Timeout);
    }

    None
}
