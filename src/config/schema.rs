//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files, and
//! every field has a default so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

/// Root configuration for an HTTP client.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Name used for the `pkg` metric label, logs and the breaker name.
    pub module_name: String,

    /// Overall deadline per call in milliseconds, retries included. `0` disables it.
    pub timeout_ms: u64,

    /// Connection pool and connector settings.
    pub transport: TransportConfig,

    /// Retry settings.
    pub retry: RetryConfig,

    /// Circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            module_name: "http-client".to_string(),
            timeout_ms: 4_000,
            transport: TransportConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Maximum idle connections kept per host.
    pub concurrency: usize,

    /// Idle connection lifetime in seconds.
    pub keep_alive_timeout_secs: u64,

    /// Close every connection after one response.
    pub disable_keep_alive: bool,

    /// TCP connect timeout in milliseconds. `0` disables it.
    pub connect_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            concurrency: 100,
            keep_alive_timeout_secs: 15,
            disable_keep_alive: false,
            connect_timeout_ms: 5_000,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Base backoff in milliseconds.
    pub wait_min_ms: u64,

    /// Backoff ceiling in milliseconds.
    pub wait_max_ms: u64,

    /// Random jitter as a fraction of the computed delay (0.0 disables).
    pub jitter: f64,

    /// Largest request body buffered for replay (unbounded if unset).
    pub max_body_bytes: Option<usize>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            wait_min_ms: 50,
            wait_max_ms: 1_000,
            jitter: 0.0,
            max_body_bytes: None,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Put a breaker in front of the retry layer.
    pub enabled: bool,

    /// Consecutive failed calls that open the breaker.
    pub consecutive_failures: u32,

    /// Time spent open before probing, in milliseconds.
    pub open_timeout_ms: u64,

    /// Concurrent probes allowed while half-open.
    pub max_requests: u32,

    /// Responses with this status or above count as failures.
    pub failure_status_code: u16,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            consecutive_failures: 2,
            open_timeout_ms: 60_000,
            max_requests: 1,
            failure_status_code: 500,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
