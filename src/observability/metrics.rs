//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define the client metrics and their labels
//! - Abstract the metering backend behind [`StatsSink`]
//! - Expose a Prometheus scrape endpoint when enabled
//!
//! # Metrics
//! - `client_http_response_seconds` (histogram): whole-call latency, retries included
//! - `client_http_retry_total` (counter): retries issued
//! - `client_http_cbopen_total` (counter): calls rejected by an open breaker
//! - `client_http_cbtoomanyrequests_total` (counter): calls rejected while half-open
//!
//! Every series carries a `pkg` label with the client's module name.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics::{describe_counter, describe_histogram, Label, Unit};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

pub const RESPONSE_SECONDS: &str = "client_http_response_seconds";
pub const RETRY_TOTAL: &str = "client_http_retry_total";
pub const CB_OPEN_TOTAL: &str = "client_http_cbopen_total";
pub const CB_TOO_MANY_REQUESTS_TOTAL: &str = "client_http_cbtoomanyrequests_total";

/// Label key carrying the module name.
pub const MODULE_LABEL: &str = "pkg";

const NOOP_MODULE: &str = "noop";

const RESPONSE_BUCKETS: [f64; 11] = [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Destination for pipeline telemetry. Must tolerate concurrent calls.
pub trait StatsSink: Send + Sync + fmt::Debug {
    fn increment(&self, name: &'static str, value: u64, labels: &[(&'static str, String)]);

    fn record_seconds(&self, name: &'static str, seconds: f64, labels: &[(&'static str, String)]);
}

/// Forwards to the global `metrics` recorder.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsSink;

impl StatsSink for MetricsSink {
    fn increment(&self, name: &'static str, value: u64, labels: &[(&'static str, String)]) {
        metrics::counter!(name, to_labels(labels)).increment(value);
    }

    fn record_seconds(&self, name: &'static str, seconds: f64, labels: &[(&'static str, String)]) {
        metrics::histogram!(name, to_labels(labels)).record(seconds);
    }
}

fn to_labels(labels: &[(&'static str, String)]) -> Vec<Label> {
    labels
        .iter()
        .map(|(key, value)| Label::new(*key, value.clone()))
        .collect()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl StatsSink for NoopSink {
    fn increment(&self, _: &'static str, _: u64, _: &[(&'static str, String)]) {}

    fn record_seconds(&self, _: &'static str, _: f64, _: &[(&'static str, String)]) {}
}

/// Telemetry handle shared by every request of one client.
#[derive(Debug, Clone)]
pub struct Stats {
    sink: Arc<dyn StatsSink>,
    module: Arc<str>,
}

impl Stats {
    pub fn new(sink: Arc<dyn StatsSink>, module: impl Into<Arc<str>>) -> Self {
        Self {
            sink,
            module: module.into(),
        }
    }

    /// Stats reported through the `metrics` facade.
    pub fn metrics(module: impl Into<Arc<str>>) -> Self {
        Self::new(Arc::new(MetricsSink), module)
    }

    /// Stats that drop everything, labelled `noop`.
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopSink), NOOP_MODULE)
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn record_retry(&self) {
        self.sink.increment(RETRY_TOTAL, 1, &self.labels());
    }

    pub fn record_breaker_open(&self) {
        self.sink.increment(CB_OPEN_TOTAL, 1, &self.labels());
    }

    pub fn record_breaker_too_many_requests(&self) {
        self.sink.increment(CB_TOO_MANY_REQUESTS_TOTAL, 1, &self.labels());
    }

    pub fn record_duration(&self, elapsed: Duration) {
        self.sink
            .record_seconds(RESPONSE_SECONDS, elapsed.as_secs_f64(), &self.labels());
    }

    fn labels(&self) -> [(&'static str, String); 1] {
        [(MODULE_LABEL, self.module.to_string())]
    }
}

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(Matcher::Full(RESPONSE_SECONDS.to_string()), &RESPONSE_BUCKETS)?
        .install()?;

    describe_histogram!(RESPONSE_SECONDS, Unit::Seconds, "Outbound HTTP call duration");
    describe_counter!(RETRY_TOTAL, "Outbound HTTP retries");
    describe_counter!(CB_OPEN_TOTAL, "Calls rejected by an open circuit breaker");
    describe_counter!(
        CB_TOO_MANY_REQUESTS_TOTAL,
        "Calls rejected by a saturated half-open circuit breaker"
    );

    tracing::info!(address = %addr, "metrics endpoint listening");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Recorder {
        events: Mutex<Vec<(&'static str, f64, Vec<(&'static str, String)>)>>,
    }

    impl StatsSink for Recorder {
        fn increment(&self, name: &'static str, value: u64, labels: &[(&'static str, String)]) {
            self.events
                .lock()
                .unwrap()
                .push((name, value as f64, labels.to_vec()));
        }

        fn record_seconds(&self, name: &'static str, seconds: f64, labels: &[(&'static str, String)]) {
            self.events.lock().unwrap().push((name, seconds, labels.to_vec()));
        }
    }

    #[test]
    fn events_are_labelled_with_module() {
        let recorder = Arc::new(Recorder::default());
        let stats = Stats::new(recorder.clone(), "billing");

        stats.record_retry();
        stats.record_breaker_open();
        stats.record_breaker_too_many_requests();
        stats.record_duration(Duration::from_millis(250));

        let events = recorder.events.lock().unwrap();
        let names: Vec<_> = events.iter().map(|(name, _, _)| *name).collect();
        assert_eq!(
            names,
            [RETRY_TOTAL, CB_OPEN_TOTAL, CB_TOO_MANY_REQUESTS_TOTAL, RESPONSE_SECONDS]
        );
        for (_, _, labels) in events.iter() {
            assert_eq!(labels, &[("pkg", "billing".to_string())]);
        }
        assert_eq!(events[3].1, 0.25);
    }

    #[test]
    fn noop_stats_accept_everything() {
        let stats = Stats::noop();
        stats.record_retry();
        stats.record_duration(Duration::from_secs(1));
        assert_eq!(stats.module(), "noop");
    }
}
