//! Base transport.
//!
//! # Responsibilities
//! - Send one request over a pooled hyper-util client (HTTP/1.1 and HTTP/2)
//! - Speak TLS through rustls with the webpki root store
//! - Reject targets the client cannot reach before touching the network
//! - Turn hyper errors into classified [`TransportError`]s
//!
//! # Design Decisions
//! - Never retries, never follows redirects; the layers above decide
//! - Pool sizing follows `TransportConfig`; `disable_keep_alive` keeps no
//!   idle connections at all

use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response, Uri};
use futures_util::future::BoxFuture;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use tower::Service;

use crate::config::schema::TransportConfig;
use crate::error::{Error, TransportError, TransportErrorKind};

type PooledClient = Client<HttpsConnector<HttpConnector>, Body>;

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: PooledClient,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_nodelay(true);
        if config.connect_timeout_ms > 0 {
            http.set_connect_timeout(Some(Duration::from_millis(config.connect_timeout_ms)));
        }

        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http);

        let max_idle = if config.disable_keep_alive {
            0
        } else {
            config.concurrency
        };

        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(Duration::from_secs(config.keep_alive_timeout_secs))
            .pool_max_idle_per_host(max_idle)
            .build(https);

        tracing::debug!(
            max_idle_per_host = max_idle,
            keep_alive_secs = config.keep_alive_timeout_secs,
            connect_timeout_ms = config.connect_timeout_ms,
            "http transport ready"
        );

        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(&TransportConfig::default())
    }
}

impl Service<Request<Body>> for HttpTransport {
    type Response = Response<Body>;
    type Error = Error;
    type Future = BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let client = self.client.clone();
        Box::pin(async move {
            check_target(request.uri())?;
            let response = client
                .request(request)
                .await
                .map_err(|e| Error::transport(TransportError::classify(e)))?;
            Ok(response.map(Body::new))
        })
    }
}

/// Only absolute `http`/`https` URLs can be sent.
fn check_target(uri: &Uri) -> Result<(), Error> {
    let invalid = |kind, message: String| Err(Error::transport(TransportError::new(kind, message)));

    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        Some(other) => {
            return invalid(
                TransportErrorKind::UnsupportedScheme,
                format!("unsupported protocol scheme \"{other}\""),
            )
        }
        None => {
            return invalid(
                TransportErrorKind::InvalidUrl,
                format!("\"{uri}\" is not an absolute URL"),
            )
        }
    }
    if uri.host().map_or(true, str::is_empty) {
        return invalid(TransportErrorKind::InvalidUrl, format!("\"{uri}\" has no host"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::ServiceExt;

    async fn send(uri: &str) -> Result<Response<Body>, Error> {
        let request = Request::get(uri).body(Body::empty()).unwrap();
        HttpTransport::default().oneshot(request).await
    }

    #[tokio::test]
    async fn rejects_unsupported_scheme() {
        let err = send("ftp://files.test/report.csv").await.unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::UnsupportedScheme));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn rejects_relative_url() {
        let err = send("/only/a/path").await.unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::InvalidUrl));
    }

    #[tokio::test]
    async fn refused_connection_is_retryable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = send(&format!("http://{addr}/")).await.unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Connect));
        assert!(err.is_retryable());
    }
}
