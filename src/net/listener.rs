//! Bounded TCP listener for client connections.
//!
//! # Responsibilities
//! - Bind the configured address
//! - Accept connections, at most `max_connections` at a time
//! - Attach a tracking guard to each accepted connection

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;
use crate::net::connection::{ConnectionGuard, ConnectionId, ConnectionTracker};

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),

    #[error("listener closed")]
    Closed,
}

/// TCP listener that stops accepting once `max_connections` are open.
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
    tracker: ConnectionTracker,
    max_connections: usize,
}

impl Listener {
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let bind_error = |source| ListenerError::Bind {
            address: config.bind_address.clone(),
            source,
        };
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|e| bind_error(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;
        let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
        Ok(Self::from_tcp(listener, config.max_connections))
    }

    /// Wrap an already bound listener.
    pub fn from_tcp(inner: TcpListener, max_connections: usize) -> Self {
        if let Ok(address) = inner.local_addr() {
            tracing::info!(address = %address, max_connections, "Listener bound");
        }
        Self {
            inner,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            tracker: ConnectionTracker::new(),
            max_connections,
        }
    }

    /// Wait for a free connection slot, then accept.
    ///
    /// The returned slot must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionSlot), ListenerError> {
        let permit = Arc::clone(&self.connection_limit)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, peer_addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer_addr = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let guard = self.tracker.track();
        tracing::debug!(
            connection_id = %guard.id(),
            peer_addr = %peer_addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((
            stream,
            peer_addr,
            ConnectionSlot {
                guard,
                _permit: permit,
            },
        ))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A client connection's claim on the listener: its connection slot and
/// its place in the shutdown drain count.
#[derive(Debug)]
pub struct ConnectionSlot {
    guard: ConnectionGuard,
    _permit: OwnedSemaphorePermit,
}

impl ConnectionSlot {
    pub fn id(&self) -> ConnectionId {
        self.guard.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_rejects_bad_address() {
        let config = ListenerConfig {
            bind_address: "not-an-address".into(),
            max_connections: 1,
        };
        assert!(matches!(
            Listener::bind(&config).await,
            Err(ListenerError::Bind { .. })
        ));
    }

    #[tokio::test]
    async fn test_accept_tracks_connection() {
        let config = ListenerConfig {
            bind_address: "127.0.0.1:0".into(),
            max_connections: 4,
        };
        let listener = Listener::bind(&config).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let tracker = listener.tracker();

        let _client = TcpStream::connect(addr).await.unwrap();
        let (_stream, _peer, slot) = listener.accept().await.unwrap();
        assert_eq!(tracker.active_count(), 1);

        drop(slot);
        assert_eq!(tracker.active_count(), 0);
    }
}
