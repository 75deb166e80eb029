//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the S3 gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// The S3-compatible backend every request is forwarded to.
    pub upstream: UpstreamConfig,

    /// Upstream connection pool settings.
    pub pool: PoolConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Request rewriting options.
    pub rewrite: RewriteConfig,

    /// Response streaming options.
    pub streaming: StreamingConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent client connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Upstream (backend) configuration.
///
/// `host` has no usable default: leaving it empty is rejected at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Backend host name or IP literal (e.g., "s3.eu-west-1.amazonaws.com").
    pub host: String,

    /// Backend port. Defaults to 80 or 443 depending on the scheme.
    pub port: Option<u16>,

    /// "http" or "https".
    pub scheme: String,

    /// "path" or "virtual-hosted".
    pub addressing_style: String,

    /// Bucket that inbound paths are relative to, if any.
    pub default_bucket: Option<String>,

    /// Region of the backend, reported in request events.
    pub region: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: None,
            scheme: "https".to_string(),
            addressing_style: "path".to_string(),
            default_bucket: None,
            region: None,
        }
    }
}

/// Upstream connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum connections per (host, port, scheme).
    pub max_size: usize,

    /// Idle connections older than this are closed.
    pub idle_timeout_secs: u64,

    /// How long a request waits for a free slot before failing.
    pub wait_timeout_ms: u64,

    /// Interval of the background idle reaper.
    pub reap_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 64,
            idle_timeout_secs: 90,
            wait_timeout_ms: 5_000,
            reap_interval_secs: 30,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for connect + response headers, per attempt, in milliseconds.
    /// Body streaming is not bounded by it.
    pub request_deadline_ms: u64,

    /// Time allowed for in-flight requests to finish on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_deadline_ms: 30_000,
            shutdown_grace_secs: 30,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Multiplier applied per retry.
    pub factor: f64,

    /// Relative jitter, e.g. 0.2 for ±20%.
    pub jitter: f64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 100,
            factor: 2.0,
            jitter: 0.2,
            max_delay_ms: 2_000,
        }
    }
}

/// Request rewriting configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RewriteConfig {
    /// Query parameter appended to non-presigned requests (e.g. "via=gateway").
    pub query_marker: Option<String>,

    /// Add X-Forwarded-For/-Proto/-Host to outbound requests.
    pub forwarded_headers: bool,

    /// Forward the client's Host header under path-style addressing.
    pub preserve_host: bool,
}

/// Response streaming configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Largest body chunk relayed to the client at once, in bytes.
    pub chunk_size: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// "text" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [upstream]
            host = "minio.local"
            scheme = "http"
            "#,
        )
        .unwrap();

        assert_eq!(config.upstream.host, "minio.local");
        assert_eq!(config.upstream.addressing_style, "path");
        assert_eq!(config.retries.max_retries, 2);
        assert_eq!(config.retries.base_delay_ms, 100);
        assert_eq!(config.pool.max_size, 64);
        assert_eq!(config.streaming.chunk_size, 64 * 1024);
        assert!(config.rewrite.query_marker.is_none());
    }
}
