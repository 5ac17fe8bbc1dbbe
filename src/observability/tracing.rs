//! Request spans for outbound calls.
//!
//! # Responsibilities
//! - Open one span per logical call (retries nest inside it)
//! - Carry the request ID so log lines correlate with upstream logs
//! - Skip operational endpoints (health and readiness probes)

use axum::http::Request;
use tower_http::trace::MakeSpan;
use tracing::Span;

use crate::http::client::X_REQUEST_ID;

/// Whether `path` addresses a health or readiness probe.
pub fn is_operational_endpoint(path: &str) -> bool {
    path.contains("health") || path.contains("ready")
}

/// [`MakeSpan`] for outbound requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientSpan;

impl<B> MakeSpan<B> for ClientSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        if is_operational_endpoint(request.uri().path()) {
            return Span::none();
        }

        let request_id = request
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");

        tracing::info_span!(
            "http_client",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}
