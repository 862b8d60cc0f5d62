//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits >= 1, delays ordered, factor >= 1)
//! - Validate addresses and URLs parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServiceConfig;

/// A single semantic problem with a configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
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

/// Check a parsed configuration, collecting every error found.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if config.throttle.max_concurrent == 0 {
        errors.push(ValidationError::new(
            "throttle.max_concurrent",
            "must be at least 1",
        ));
    }

    let retries = &config.retries;
    if retries.min_delay_ms > retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.min_delay_ms",
            format!(
                "{} exceeds max_delay_ms {}",
                retries.min_delay_ms, retries.max_delay_ms
            ),
        ));
    }
    if !retries.factor.is_finite() || retries.factor < 1.0 {
        errors.push(ValidationError::new(
            "retries.factor",
            format!("{} must be a finite number >= 1", retries.factor),
        ));
    }

    if config.router.max_body_bytes == 0 {
        errors.push(ValidationError::new(
            "router.max_body_bytes",
            "must be greater than 0",
        ));
    }

    let base_url = &config.upstream.base_url;
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        errors.push(ValidationError::new(
            "upstream.base_url",
            format!("'{}' must be an http(s) URL", base_url),
        ));
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!(
                "'{}' is not a socket address",
                config.observability.metrics_address
            ),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
