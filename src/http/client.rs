//! Client facade over the resilient pipeline.
//!
//! # Responsibilities
//! - Compose the layers in their fixed order around the base transport
//! - Apply the overall timeout as a [`Deadline`] on every call
//! - Offer `get`/`post`/`send` convenience entry points
//!
//! # Layer Order (outermost first)
//! ```text
//! circuit breaker (optional)
//!     → x-request-id + user-agent
//!     → trace span
//!     → retry
//!     → transport
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::USER_AGENT;
use axum::http::{HeaderName, HeaderValue, Request, Response};
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service, ServiceBuilder, ServiceExt};
use tower_http::map_response_body::MapResponseBodyLayer;
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::set_header::SetRequestHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::{validate_config, ClientConfig, ConfigError};
use crate::error::Error;
use crate::http::transport::HttpTransport;
use crate::observability::{ClientSpan, Stats, StatsSink};
use crate::resilience::{
    BreakerSettings, CircuitBreaker, CircuitBreakerLayer, Deadline, RetryLayer, RetryPolicy,
};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

const DEFAULT_USER_AGENT: &str = concat!("resilient-http/", env!("CARGO_PKG_VERSION"));

/// Type-erased sender, used for both the base transport and the full pipeline.
pub type BoxSender = BoxCloneSyncService<Request<Body>, Response<Body>, Error>;

/// Cheap to clone; clones share one breaker and one stats handle.
#[derive(Clone)]
pub struct HttpClient {
    pipeline: BoxSender,
    breaker: Option<Arc<CircuitBreaker>>,
    stats: Stats,
    timeout: Option<Duration>,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("module", &self.stats.module())
            .field("breaker", &self.breaker.as_ref().map(|b| b.state()))
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Validate `config` and build a client reporting through the `metrics` facade.
    pub fn from_config(config: &ClientConfig) -> Result<Self, Error> {
        validate_config(config).map_err(ConfigError::Validation)?;
        Ok(Self::builder().config(config.clone()).build())
    }

    /// The shared breaker, if enabled.
    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Send `request` through the pipeline.
    ///
    /// A [`Deadline`] already present on the request wins over the client timeout.
    pub async fn send(&self, mut request: Request<Body>) -> Result<Response<Body>, Error> {
        if let Some(timeout) = self.timeout {
            if request.extensions().get::<Deadline>().is_none() {
                request.extensions_mut().insert(Deadline::after(timeout));
            }
        }
        self.pipeline.clone().oneshot(request).await
    }

    pub async fn get(&self, uri: &str) -> Result<Response<Body>, Error> {
        let request = Request::get(uri).body(Body::empty())?;
        self.send(request).await
    }

    pub async fn post(&self, uri: &str, body: impl Into<Body>) -> Result<Response<Body>, Error> {
        let request = Request::post(uri).body(body.into())?;
        self.send(request).await
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Default)]
pub struct HttpClientBuilder {
    config: ClientConfig,
    sink: Option<Arc<dyn StatsSink>>,
    transport: Option<BoxSender>,
}

impl fmt::Debug for HttpClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClientBuilder")
            .field("config", &self.config)
            .field("sink", &self.sink)
            .field("custom_transport", &self.transport.is_some())
            .finish()
    }
}

impl HttpClientBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Report telemetry to `sink` instead of the `metrics` facade.
    pub fn stats_sink(mut self, sink: Arc<dyn StatsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replace the hyper transport with any sender.
    pub fn transport<T>(mut self, transport: T) -> Self
    where
        T: Service<Request<Body>, Response = Response<Body>, Error = Error>
            + Clone
            + Send
            + Sync
            + 'static,
        T::Future: Send + 'static,
    {
        self.transport = Some(BoxCloneSyncService::new(transport));
        self
    }

    pub fn build(self) -> HttpClient {
        let config = self.config;
        let module = config.module_name.as_str();
        let stats = match self.sink {
            Some(sink) => Stats::new(sink, module),
            None => Stats::metrics(module),
        };

        let transport = self
            .transport
            .unwrap_or_else(|| BoxCloneSyncService::new(HttpTransport::new(&config.transport)));

        let inner = ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
            .layer(SetRequestHeaderLayer::if_not_present(
                USER_AGENT,
                HeaderValue::from_static(DEFAULT_USER_AGENT),
            ))
            .layer(MapResponseBodyLayer::new(Body::new))
            .layer(TraceLayer::new_for_http().make_span_with(ClientSpan))
            .layer(RetryLayer::new(RetryPolicy::from(&config.retry), stats.clone()))
            .service(transport);

        let (pipeline, breaker) = if config.circuit_breaker.enabled {
            let settings = BreakerSettings::from_config(module, &config.circuit_breaker);
            let breaker = Arc::new(CircuitBreaker::new(settings));
            let service = CircuitBreakerLayer::new(breaker.clone(), stats.clone()).layer(inner);
            (BoxCloneSyncService::new(service), Some(breaker))
        } else {
            (BoxCloneSyncService::new(inner), None)
        };

        let timeout = (config.timeout_ms > 0).then(|| Duration::from_millis(config.timeout_ms));

        tracing::debug!(
            module = %module,
            breaker = breaker.is_some(),
            max_retries = config.retry.max_retries,
            timeout_ms = config.timeout_ms,
            "http client built"
        );

        HttpClient {
            pipeline,
            breaker,
            stats,
            timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use futures_util::future::BoxFuture;
    use std::sync::Mutex;

    /// Transport that records request heads and answers 200.
    fn recording(
        seen: Arc<Mutex<Vec<Request<()>>>>,
    ) -> impl Service<
        Request<Body>,
        Response = Response<Body>,
        Error = Error,
        Future = BoxFuture<'static, Result<Response<Body>, Error>>,
    > + Clone
           + Send
           + Sync
           + 'static {
        tower::service_fn(move |req: Request<Body>| {
            let (parts, _) = req.into_parts();
            seen.lock().unwrap().push(Request::from_parts(parts, ()));
            Box::pin(async { Ok(Response::new(Body::from("ok"))) })
                as BoxFuture<'static, Result<Response<Body>, Error>>
        })
    }

    #[tokio::test]
    async fn sets_default_headers_and_deadline() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let client = HttpClient::builder()
            .stats_sink(Arc::new(crate::observability::NoopSink))
            .transport(recording(seen.clone()))
            .build();

        let response = client.get("http://svc.test/items").await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let seen = seen.lock().unwrap();
        let head = &seen[0];
        assert!(head.headers().contains_key(X_REQUEST_ID));
        assert_eq!(head.headers()[USER_AGENT], DEFAULT_USER_AGENT);
        assert!(head.extensions().get::<Deadline>().is_some());
    }

    #[tokio::test]
    async fn keeps_caller_headers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let client = HttpClient::builder()
            .stats_sink(Arc::new(crate::observability::NoopSink))
            .transport(recording(seen.clone()))
            .build();

        let request = Request::get("http://svc.test/")
            .header(USER_AGENT, "custom/1.0")
            .header(X_REQUEST_ID, "req-42")
            .body(Body::empty())
            .unwrap();
        client.send(request).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].headers()[USER_AGENT], "custom/1.0");
        assert_eq!(seen[0].headers()[X_REQUEST_ID], "req-42");
    }

    #[tokio::test]
    async fn zero_timeout_sets_no_deadline() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let config = ClientConfig {
            timeout_ms: 0,
            ..ClientConfig::default()
        };
        let client = HttpClient::builder()
            .config(config)
            .stats_sink(Arc::new(crate::observability::NoopSink))
            .transport(recording(seen.clone()))
            .build();

        client.get("http://svc.test/").await.unwrap();
        assert!(seen.lock().unwrap()[0].extensions().get::<Deadline>().is_none());
    }

    #[test]
    fn breaker_follows_config() {
        let mut config = ClientConfig::default();
        assert!(HttpClient::builder().config(config.clone()).build().breaker().is_none());

        config.circuit_breaker.enabled = true;
        config.module_name = "billing".to_string();
        let client = HttpClient::builder()
            .config(config)
            .stats_sink(Arc::new(crate::observability::NoopSink))
            .build();
        let breaker = client.breaker().unwrap();
        assert_eq!(breaker.name(), "billing");

        let clone = client.clone();
        assert!(Arc::ptr_eq(breaker, clone.breaker().unwrap()));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = ClientConfig::default();
        config.retry.jitter = 2.0;
        let err = HttpClient::from_config(&config).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Validation(_))));
    }
}
