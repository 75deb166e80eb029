//! Metrics collection and exposition.
//!
//! # Metrics
//! - `s3_gateway_requests_total` (counter): requests by method, outcome, status
//! - `s3_gateway_request_duration_seconds` (histogram): end-to-end latency
//! - `s3_gateway_upstream_retries_total` (counter): retried upstream attempts
//! - `s3_gateway_truncated_responses_total` (counter): bodies cut mid-stream
//! - `s3_gateway_pool_connections` (gauge): pool slots by upstream and state
//!
//! Recording goes through the `metrics` facade and is a no-op until an
//! exporter is installed.

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Start the Prometheus scrape endpoint. Must run inside the Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(method: &str, outcome: &'static str, status: u16, latency: Duration) {
    metrics::counter!(
        "s3_gateway_requests_total",
        "method" => method.to_string(),
        "outcome" => outcome,
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("s3_gateway_request_duration_seconds", "method" => method.to_string())
        .record(latency.as_secs_f64());
}

pub fn record_retry(method: &str) {
    metrics::counter!("s3_gateway_upstream_retries_total", "method" => method.to_string()).increment(1);
}

pub fn record_truncated_response() {
    metrics::counter!("s3_gateway_truncated_responses_total").increment(1);
}

/// Adjust the checked-out slot count. Pools of the same upstream share
/// one series, so per-bucket endpoints don't multiply label values.
pub fn record_pool_in_use(upstream: &str, delta: f64) {
    metrics::gauge!("s3_gateway_pool_connections", "upstream" => upstream.to_string(), "state" => "in_use")
        .increment(delta);
}

pub fn record_pool_idle(upstream: &str, delta: f64) {
    metrics::gauge!("s3_gateway_pool_connections", "upstream" => upstream.to_string(), "state" => "idle")
        .increment(delta);
}
