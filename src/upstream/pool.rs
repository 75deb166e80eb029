//! Per-endpoint upstream connection pool.
//!
//! # Responsibilities
//! - Bound the connections to one endpoint (checked out + idle ≤ max_size)
//! - Reuse idle connections, newest first
//! - Make callers wait for a free slot, up to `wait_timeout`
//! - Evict idle connections that outlived `idle_timeout`
//!
//! # Design Decisions
//! - A semaphore permit is a checkout slot; it is held by `PooledConnection`
//!   until the response body is fully relayed or abandoned
//! - Connections are opened lazily, on the first send through a slot
//! - A connection goes back to the idle list only after an explicit
//!   `release`; every other way of dropping a checkout closes the socket

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, Response};
use hyper::body::Incoming;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_rustls::TlsConnector;

use crate::backend::Endpoint;
use crate::config::PoolConfig;
use crate::net::connection::ConnectionId;
use crate::observability::metrics;
use crate::upstream::connection::ConnectionHandle;
use crate::upstream::error::DispatchError;

/// Pool limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_size: usize,
    pub idle_timeout: Duration,
    pub wait_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from(&PoolConfig::default())
    }
}

impl From<&PoolConfig> for PoolSettings {
    fn from(config: &PoolConfig) -> Self {
        Self {
            max_size: config.max_size,
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            wait_timeout: Duration::from_millis(config.wait_timeout_ms),
        }
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub max_size: usize,
    /// Checked-out slots.
    pub in_use: usize,
    /// Connections parked for reuse.
    pub idle: usize,
    /// Live upstream sockets (checked out or idle).
    pub open: usize,
}

struct IdleConnection {
    handle: ConnectionHandle,
    last_used_at: Instant,
}

/// Connections to a single endpoint.
pub struct ConnectionPool {
    endpoint: Endpoint,
    /// Upstream label for the pool gauges, shared by every pool of one target.
    label: Arc<str>,
    settings: PoolSettings,
    slots: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleConnection>>,
    open: Arc<AtomicUsize>,
    tls: Option<TlsConnector>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("endpoint", &self.endpoint)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ConnectionPool {
    pub fn new(
        endpoint: Endpoint,
        label: Arc<str>,
        settings: PoolSettings,
        tls: Option<TlsConnector>,
    ) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            label,
            slots: Arc::new(Semaphore::new(settings.max_size)),
            settings,
            idle: Mutex::new(VecDeque::new()),
            open: Arc::new(AtomicUsize::new(0)),
            tls,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Claim a slot, waiting at most `wait_timeout` for one to free up.
    pub async fn checkout(self: &Arc<Self>) -> Result<PooledConnection, DispatchError> {
        let exhausted = || DispatchError::PoolExhausted {
            endpoint: self.endpoint.to_string(),
            waited: self.settings.wait_timeout,
        };

        let slot = match tokio::time::timeout(
            self.settings.wait_timeout,
            Arc::clone(&self.slots).acquire_owned(),
        )
        .await
        {
            Ok(Ok(slot)) => slot,
            Ok(Err(_closed)) => return Err(exhausted()),
            Err(_elapsed) => {
                tracing::warn!(
                    endpoint = %self.endpoint,
                    max_size = self.settings.max_size,
                    waited = ?self.settings.wait_timeout,
                    "Connection pool exhausted"
                );
                return Err(exhausted());
            }
        };

        let (handle, last_used_at) = match self.take_idle() {
            Some(idle) => (Some(idle.handle), idle.last_used_at),
            None => (None, Instant::now()),
        };
        let connection = PooledConnection {
            pool: Arc::clone(self),
            reused: handle.is_some(),
            handle,
            last_used_at,
            reusable: false,
            _slot: slot,
        };
        metrics::record_pool_in_use(&self.label, 1.0);
        Ok(connection)
    }

    /// Newest usable idle connection; stale or closed ones are dropped.
    fn take_idle(&self) -> Option<IdleConnection> {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        let mut taken = 0;
        let mut found = None;
        while let Some(candidate) = idle.pop_back() {
            taken += 1;
            if candidate.handle.is_closed()
                || candidate.last_used_at.elapsed() >= self.settings.idle_timeout
            {
                continue;
            }
            found = Some(candidate);
            break;
        }
        drop(idle);
        if taken > 0 {
            metrics::record_pool_idle(&self.label, -(taken as f64));
        }
        found
    }

    fn put_idle(&self, handle: ConnectionHandle, last_used_at: Instant) {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        idle.push_back(IdleConnection {
            handle,
            last_used_at,
        });
        drop(idle);
        metrics::record_pool_idle(&self.label, 1.0);
    }

    /// Close idle connections past `idle_timeout` or already closed by the
    /// peer. Returns how many were closed.
    pub fn evict_idle(&self) -> usize {
        let evicted: VecDeque<IdleConnection> = {
            let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
            let (keep, evict): (VecDeque<_>, VecDeque<_>) = idle.drain(..).partition(|c| {
                !c.handle.is_closed() && c.last_used_at.elapsed() < self.settings.idle_timeout
            });
            *idle = keep;
            evict
        };
        let count = evicted.len();
        drop(evicted);
        if count > 0 {
            metrics::record_pool_idle(&self.label, -(count as f64));
        }
        count
    }

    /// Close every idle connection.
    pub fn close_idle(&self) -> usize {
        let drained: Vec<IdleConnection> = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        if !drained.is_empty() {
            metrics::record_pool_idle(&self.label, -(drained.len() as f64));
        }
        drained.len()
    }

    /// True when nothing is checked out and nothing is parked.
    pub fn is_empty(&self) -> bool {
        let stats = self.stats();
        stats.in_use == 0 && stats.idle == 0
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner).len();
        PoolStats {
            max_size: self.settings.max_size,
            in_use: self.settings.max_size - self.slots.available_permits(),
            idle,
            open: self.open.load(Ordering::SeqCst),
        }
    }
}

/// A checked-out pool slot, possibly holding an open connection.
///
/// Dropping it frees the slot. The connection itself is kept for reuse
/// only if `release` was called and it is still open.
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    handle: Option<ConnectionHandle>,
    last_used_at: Instant,
    reused: bool,
    reusable: bool,
    _slot: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("endpoint", &self.pool.endpoint)
            .field("connection_id", &self.id())
            .field("reused", &self.reused)
            .finish()
    }
}

impl PooledConnection {
    pub fn id(&self) -> Option<ConnectionId> {
        self.handle.as_ref().map(ConnectionHandle::id)
    }

    /// True when the slot came with an idle connection.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.pool.endpoint
    }

    /// Open the connection if the slot has none yet.
    pub async fn connect(&mut self) -> Result<(), DispatchError> {
        self.handle().await.map(|_| ())
    }

    async fn handle(&mut self) -> Result<&mut ConnectionHandle, DispatchError> {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => {
                ConnectionHandle::open(
                    &self.pool.endpoint,
                    self.pool.tls.as_ref(),
                    Arc::clone(&self.pool.open),
                )
                .await?
            }
        };
        Ok(self.handle.insert(handle))
    }

    /// Send a request, connecting first if needed.
    ///
    /// On error the connection is closed; the slot stays checked out.
    pub async fn send(&mut self, request: Request<Body>) -> Result<Response<Incoming>, DispatchError> {
        let handle = self.handle().await?;
        match handle.send(request).await {
            Ok(response) => {
                self.last_used_at = Instant::now();
                Ok(response)
            }
            Err(error) => {
                self.handle = None;
                Err(error)
            }
        }
    }

    /// Return the connection to the pool for reuse. Call only once the
    /// response body has been read to its end.
    pub fn release(mut self) {
        self.reusable = true;
        self.last_used_at = Instant::now();
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if self.reusable && !handle.is_closed() {
                tracing::trace!(connection_id = %handle.id(), endpoint = %self.pool.endpoint, "Connection returned to pool");
                self.pool.put_idle(handle, self.last_used_at);
            } else {
                tracing::debug!(connection_id = %handle.id(), endpoint = %self.pool.endpoint, "Connection discarded");
            }
        }
        metrics::record_pool_in_use(&self.pool.label, -1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::UpstreamScheme;
    use tokio::net::TcpListener;

    fn endpoint(port: u16) -> Endpoint {
        Endpoint {
            host: "127.0.0.1".into(),
            port,
            scheme: UpstreamScheme::Http,
        }
    }

    fn label() -> Arc<str> {
        Arc::from("http://127.0.0.1")
    }

    fn settings(max_size: usize, wait_ms: u64) -> PoolSettings {
        PoolSettings {
            max_size,
            idle_timeout: Duration::from_secs(60),
            wait_timeout: Duration::from_millis(wait_ms),
        }
    }

    #[tokio::test]
    async fn test_checkout_bounded_by_max_size() {
        let pool = ConnectionPool::new(endpoint(9), label(), settings(2, 50), None);

        let first = pool.checkout().await.unwrap();
        let second = pool.checkout().await.unwrap();
        assert_eq!(pool.stats().in_use, 2);

        let err = pool.checkout().await.unwrap_err();
        assert!(matches!(err, DispatchError::PoolExhausted { .. }));

        drop(first);
        assert_eq!(pool.stats().in_use, 1);
        let third = pool.checkout().await.unwrap();
        assert_eq!(pool.stats().in_use, 2);

        drop(second);
        drop(third);
        assert_eq!(pool.stats().in_use, 0);
    }

    #[tokio::test]
    async fn test_waiter_gets_released_slot() {
        let pool = ConnectionPool::new(endpoint(9), label(), settings(1, 2_000), None);
        let held = pool.checkout().await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.checkout().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);

        waiter.await.unwrap().unwrap();
        assert_eq!(pool.stats().in_use, 0);
    }

    #[tokio::test]
    async fn test_failed_connect_keeps_accounting_exact() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let pool = ConnectionPool::new(endpoint(port), label(), settings(1, 50), None);
        let mut connection = pool.checkout().await.unwrap();
        let request = Request::get("/bucket/key").body(Body::empty()).unwrap();
        let err = connection.send(request).await.unwrap_err();
        assert!(matches!(err, DispatchError::Connect { .. }));
        drop(connection);

        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.open, 0);
    }

    #[tokio::test]
    async fn test_unreleased_connection_is_discarded() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let pool = ConnectionPool::new(endpoint(port), label(), settings(1, 50), None);
        let handle = ConnectionHandle::open(&endpoint(port), None, Arc::clone(&pool.open))
            .await
            .unwrap();
        let mut connection = pool.checkout().await.unwrap();
        connection.handle = Some(handle);
        assert_eq!(pool.stats().open, 1);

        drop(connection);
        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.open, 0);
        assert_eq!(stats.in_use, 0);
    }

    #[tokio::test]
    async fn test_released_connection_is_reused_then_evicted() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let pool = ConnectionPool::new(
            endpoint(port),
            label(),
            PoolSettings {
                max_size: 1,
                idle_timeout: Duration::from_millis(100),
                wait_timeout: Duration::from_millis(50),
            },
            None,
        );
        let handle = ConnectionHandle::open(&endpoint(port), None, Arc::clone(&pool.open))
            .await
            .unwrap();
        let mut connection = pool.checkout().await.unwrap();
        connection.handle = Some(handle);
        connection.release();
        assert_eq!(pool.stats().idle, 1);

        let again = pool.checkout().await.unwrap();
        assert!(again.is_reused());
        again.release();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(pool.evict_idle(), 1);
        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.open, 0);
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_connect_opens_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut sockets = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                sockets.push(socket);
            }
        });

        let pool = ConnectionPool::new(endpoint(port), label(), settings(1, 50), None);
        let mut connection = pool.checkout().await.unwrap();
        assert!(connection.id().is_none());
        connection.connect().await.unwrap();
        let id = connection.id();
        assert!(id.is_some());
        connection.connect().await.unwrap();
        assert_eq!(connection.id(), id);
        assert_eq!(pool.stats().open, 1);
        assert!(!pool.is_empty());
    }
}
