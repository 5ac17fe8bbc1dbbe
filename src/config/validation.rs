//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (backoff bounds, jitter, status threshold)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ClientConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.module_name.trim().is_empty() {
        errors.push(ValidationError::new("module_name", "must not be empty"));
    }

    let retry = &config.retry;
    if retry.wait_max_ms == 0 {
        errors.push(ValidationError::new("retry.wait_max_ms", "must be greater than zero"));
    }
    if retry.wait_min_ms > retry.wait_max_ms {
        errors.push(ValidationError::new(
            "retry.wait_min_ms",
            format!(
                "{} exceeds retry.wait_max_ms ({})",
                retry.wait_min_ms, retry.wait_max_ms
            ),
        ));
    }
    if !(0.0..=1.0).contains(&retry.jitter) {
        errors.push(ValidationError::new(
            "retry.jitter",
            format!("{} is outside [0, 1]", retry.jitter),
        ));
    }

    let status = config.circuit_breaker.failure_status_code;
    if !(100..=999).contains(&status) {
        errors.push(ValidationError::new(
            "circuit_breaker.failure_status_code",
            format!("{status} is not a valid HTTP status"),
        ));
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&ClientConfig::default()), Ok(()));
    }

    #[test]
    fn zero_timeout_is_allowed() {
        let config = ClientConfig {
            timeout_ms: 0,
            ..ClientConfig::default()
        };
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn reports_every_violation() {
        let mut config = ClientConfig::default();
        config.module_name = " ".to_string();
        config.retry.wait_min_ms = 2_000;
        config.retry.jitter = 1.5;
        config.circuit_breaker.failure_status_code = 42;
        config.observability.metrics_enabled = true;
        config.observability.metrics_address = "nowhere".to_string();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            [
                "module_name",
                "retry.wait_min_ms",
                "retry.jitter",
                "circuit_breaker.failure_status_code",
                "observability.metrics_address",
            ]
        );
    }
}
