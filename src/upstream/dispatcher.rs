//! Upstream dispatch with pooling, deadlines and retries.
//!
//! # Responsibilities
//! - Pick (or create) the pool for the request's endpoint
//! - Bound each attempt's connect and header wait by the request deadline
//! - Retry transient failures of replayable requests with backoff
//! - Abort promptly when the client goes away
//!
//! # Design Decisions
//! - The deadline is per attempt. It covers connect, then pauses while the
//!   request body uploads, then covers the wait for the response head.
//!   Body streaming in either direction is bounded only by cancellation
//! - Pools that hold nothing are dropped by the reaper, so per-bucket
//!   endpoints don't accumulate
//! - Waiting for a pool slot has its own bound (`wait_timeout`)
//! - Any response, whatever its status, is final

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, Response};
use dashmap::DashMap;
use http_body::Body as _;
use hyper::body::Incoming;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

use crate::backend::{Endpoint, UpstreamScheme, UpstreamTarget};
use crate::config::{ConfigError, GatewayConfig};
use crate::observability::metrics;
use crate::resilience::{is_idempotent, RetryPolicy, RetryState};
use crate::rewrite::OutboundRequest;
use crate::upstream::body::UploadBody;
use crate::upstream::connection::tls_connector;
use crate::upstream::error::{DispatchError, DispatchFailure};
use crate::upstream::pool::{ConnectionPool, PoolSettings, PoolStats, PooledConnection};

/// Response head from the backend, with the connection its body arrives on.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub response: Response<Incoming>,
    pub connection: PooledConnection,
    pub retries: u32,
}

/// Sends rewritten requests to the backend.
pub struct Dispatcher {
    pools: DashMap<Endpoint, Arc<ConnectionPool>>,
    /// Gauge label shared by every pool.
    label: Arc<str>,
    pool_settings: PoolSettings,
    retry: RetryPolicy,
    tls: Option<TlsConnector>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pools", &self.pools.len())
            .field("label", &self.label)
            .field("pool_settings", &self.pool_settings)
            .field("retry", &self.retry)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

impl Dispatcher {
    pub fn new(pool_settings: PoolSettings, retry: RetryPolicy, tls: Option<TlsConnector>) -> Self {
        Self {
            pools: DashMap::new(),
            label: Arc::from("upstream"),
            pool_settings,
            retry,
            tls,
        }
    }

    /// Build from configuration, loading TLS roots when the backend is https.
    pub fn from_config(config: &GatewayConfig, target: &UpstreamTarget) -> Result<Self, ConfigError> {
        let tls = match target.scheme {
            UpstreamScheme::Https => Some(tls_connector()?),
            UpstreamScheme::Http => None,
        };
        Ok(Self::new(
            PoolSettings::from(&config.pool),
            RetryPolicy::from(&config.retries),
            tls,
        )
        .with_label(target.to_string()))
    }

    /// Label the pool gauges with `label` instead of the per-pool endpoint.
    pub fn with_label(mut self, label: impl Into<Arc<str>>) -> Self {
        self.label = label.into();
        self
    }

    /// The pool for `endpoint`, created on first use.
    pub fn pool(&self, endpoint: &Endpoint) -> Arc<ConnectionPool> {
        if let Some(pool) = self.pools.get(endpoint) {
            return Arc::clone(&pool);
        }
        let entry = self.pools.entry(endpoint.clone()).or_insert_with(|| {
            tracing::debug!(endpoint = %endpoint, max_size = self.pool_settings.max_size, "Creating connection pool");
            ConnectionPool::new(
                endpoint.clone(),
                Arc::clone(&self.label),
                self.pool_settings,
                self.tls.clone(),
            )
        });
        Arc::clone(&entry)
    }

    pub fn pool_stats(&self) -> Vec<(Endpoint, PoolStats)> {
        self.pools
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect()
    }

    /// Checked-out slots across all pools.
    pub fn in_use(&self) -> usize {
        self.pools.iter().map(|entry| entry.value().stats().in_use).sum()
    }

    pub fn evict_idle(&self) -> usize {
        self.pools.iter().map(|entry| entry.value().evict_idle()).sum()
    }

    /// Drop pools with nothing checked out and nothing parked.
    ///
    /// A pool still referenced elsewhere (a checkout in progress) is kept.
    /// `retain` holds the shard lock, so `pool` cannot hand out the removed
    /// entry concurrently.
    pub fn prune_pools(&self) -> usize {
        let before = self.pools.len();
        self.pools
            .retain(|_, pool| Arc::strong_count(pool) > 1 || !pool.is_empty());
        before.saturating_sub(self.pools.len())
    }

    /// Close every idle upstream connection.
    pub fn close_idle(&self) -> usize {
        self.pools.iter().map(|entry| entry.value().close_idle()).sum()
    }

    /// Periodically evict idle connections until `shutdown` fires.
    pub async fn run_reaper(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        tracing::info!(interval = ?interval, "Idle connection reaper starting");
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.evict_idle();
                    if evicted > 0 {
                        tracing::debug!(evicted, "Evicted idle upstream connections");
                    }
                    let pruned = self.prune_pools();
                    if pruned > 0 {
                        tracing::debug!(pruned, pools = self.pools.len(), "Dropped empty connection pools");
                    }
                }
                _ = shutdown.cancelled() => {
                    let closed = self.close_idle();
                    tracing::info!(closed, "Idle connection reaper stopping");
                    break;
                }
            }
        }
    }

    /// Send `request` and wait for the response head.
    ///
    /// `deadline` bounds connect plus the wait for headers once the request
    /// body has been sent, per attempt. Bodies are
    /// consumed by the first attempt, so only idempotent requests with an
    /// empty body are ever retried.
    pub async fn dispatch(
        &self,
        request: OutboundRequest,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<UpstreamResponse, DispatchFailure> {
        let OutboundRequest { head, body } = request;
        let replayable = is_idempotent(&head.method) && body.is_end_stream();
        let pool = self.pool(&head.endpoint);
        let mut state = RetryState::new(self.retry, replayable);
        let mut body = Some(body);

        loop {
            let attempt_deadline = state.begin_attempt(deadline);
            let attempt = head.to_request(body.take().unwrap_or_else(Body::empty));

            let error = match Self::attempt(&pool, attempt, attempt_deadline, cancel).await {
                Ok((response, connection)) => {
                    return Ok(UpstreamResponse {
                        response,
                        connection,
                        retries: state.retries(),
                    });
                }
                Err(error) => error,
            };

            let Some(delay) = state.record_failure(&error, error.is_transient()) else {
                return Err(DispatchFailure {
                    error,
                    retries: state.retries(),
                });
            };

            tracing::warn!(
                endpoint = %head.endpoint,
                method = %head.method,
                attempt = state.attempts(),
                delay = ?delay,
                error = %error,
                "Upstream attempt failed, retrying"
            );
            metrics::record_retry(head.method.as_str());

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(DispatchFailure {
                        error: DispatchError::Cancelled,
                        retries: state.retries(),
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(
        pool: &Arc<ConnectionPool>,
        request: Request<Body>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<(Response<Incoming>, PooledConnection), DispatchError> {
        let mut connection = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
            checkout = pool.checkout() => checkout?,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
            connected = tokio::time::timeout_at(deadline.into(), connection.connect()) => {
                connected.unwrap_or(Err(DispatchError::Timeout))?;
            }
        }

        // What is left of the budget once connected waits for the upload.
        let remaining = deadline.saturating_duration_since(Instant::now());
        let (request, mut uploaded) = UploadBody::wrap(request);
        let response = {
            let exchange = connection.send(request);
            tokio::pin!(exchange);
            let early = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
                sent = &mut exchange => Some(sent),
                _ = &mut uploaded => None,
            };
            match early {
                Some(sent) => sent?,
                None => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
                    sent = tokio::time::timeout(remaining, &mut exchange) => {
                        sent.unwrap_or(Err(DispatchError::Timeout))?
                    }
                },
            }
        };

        tracing::trace!(
            endpoint = %pool.endpoint(),
            connection_id = ?connection.id(),
            reused = connection.is_reused(),
            status = %response.status(),
            "Upstream response head received"
        );
        Ok((response, connection))
    }
}
