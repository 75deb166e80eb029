//! Configuration validation.
//!
//! Serde handles syntax; this checks value ranges and required options.
//! All problems are collected so an operator sees them in one run.

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::GatewayConfig;

/// Largest accepted streaming chunk.
const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending option.
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

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("not a socket address: {:?}", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be > 0"));
    }

    if config.upstream.host.trim().is_empty() {
        errors.push(ValidationError::new("upstream.host", "required option is missing"));
    }
    if config.upstream.port == Some(0) {
        errors.push(ValidationError::new("upstream.port", "must be > 0"));
    }
    if let Some(bucket) = &config.upstream.default_bucket {
        if bucket.is_empty() || bucket.contains('/') {
            errors.push(ValidationError::new(
                "upstream.default_bucket",
                "must be a non-empty bucket name without '/'",
            ));
        }
    }

    if config.pool.max_size == 0 {
        errors.push(ValidationError::new("pool.max_size", "must be > 0"));
    }
    if config.pool.wait_timeout_ms == 0 {
        errors.push(ValidationError::new("pool.wait_timeout_ms", "must be > 0"));
    }
    if config.pool.reap_interval_secs == 0 {
        errors.push(ValidationError::new("pool.reap_interval_secs", "must be > 0"));
    }

    if config.timeouts.request_deadline_ms == 0 {
        errors.push(ValidationError::new("timeouts.request_deadline_ms", "must be > 0"));
    }

    if config.retries.max_retries > 10 {
        errors.push(ValidationError::new("retries.max_retries", "must be <= 10"));
    }
    if !(config.retries.factor >= 1.0) {
        errors.push(ValidationError::new("retries.factor", "must be >= 1.0"));
    }
    if !(0.0..1.0).contains(&config.retries.jitter) {
        errors.push(ValidationError::new("retries.jitter", "must be in [0.0, 1.0)"));
    }
    if config.retries.max_delay_ms < config.retries.base_delay_ms {
        errors.push(ValidationError::new(
            "retries.max_delay_ms",
            "must be >= retries.base_delay_ms",
        ));
    }

    if let Some(marker) = &config.rewrite.query_marker {
        if marker.is_empty() || marker.contains(['&', '?', '#', ' ']) {
            errors.push(ValidationError::new(
                "rewrite.query_marker",
                "must be a single non-empty key[=value] pair",
            ));
        }
    }

    if config.streaming.chunk_size == 0 || config.streaming.chunk_size > MAX_CHUNK_SIZE {
        errors.push(ValidationError::new(
            "streaming.chunk_size",
            format!("must be in 1..={MAX_CHUNK_SIZE}"),
        ));
    }

    if !matches!(config.observability.log_format.as_str(), "text" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            "must be \"text\" or \"json\"",
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "not a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
