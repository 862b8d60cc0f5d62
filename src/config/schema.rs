//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a pipeline
//! service. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for a metering pipeline service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Concurrency limit applied to outbound calls.
    pub throttle: ThrottleConfig,

    /// Retry policy applied to outbound calls.
    pub retries: RetryConfig,

    /// Request router settings.
    pub router: RouterConfig,

    /// Next pipeline stage this service calls.
    pub upstream: UpstreamConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Throttle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Maximum number of outstanding calls; the rest queue FIFO.
    pub max_concurrent: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self { max_concurrent: 10 }
    }
}

/// Retry configuration.
///
/// Every field defaults independently, so `retries = 2` alone is a valid policy.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts are `retries + 1`.
    pub retries: u32,

    /// Delay before the first retry in milliseconds.
    pub min_delay_ms: u64,

    /// Upper bound on any single delay in milliseconds.
    pub max_delay_ms: u64,

    /// Growth factor between consecutive delays.
    pub factor: f64,

    /// Draw each wait uniformly from `[0, delay]` instead of waiting exactly `delay`.
    pub randomize: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 5,
            min_delay_ms: 50,
            max_delay_ms: 500,
            factor: 2.0,
            randomize: true,
        }
    }
}

/// Router configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Maximum buffered request body in bytes.
    pub max_body_bytes: usize,

    /// Include the message of status-less errors in error responses.
    pub expose_errors: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 2 * 1024 * 1024, // 2MB
            expose_errors: false,
        }
    }
}

/// Upstream (next pipeline stage) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the next stage, e.g. "http://aggregator:8080".
    pub base_url: String,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Per-attempt request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8081".to_string(),
            connect_timeout_secs: 5,
            request_timeout_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_fields_default_independently() {
        let config: RetryConfig = toml::from_str("retries = 2\nrandomize = false").unwrap();
        assert_eq!(config.retries, 2);
        assert!(!config.randomize);
        assert_eq!(config.min_delay_ms, 50);
        assert_eq!(config.max_delay_ms, 500);
        assert_eq!(config.factor, 2.0);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: ServiceConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.throttle.max_concurrent, 10);
        assert_eq!(config.retries, RetryConfig::default());
        assert_eq!(config.router.max_body_bytes, 2 * 1024 * 1024);
    }
}
