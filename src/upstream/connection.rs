//! Upstream connection establishment.
//!
//! # Responsibilities
//! - Open TCP (and optionally rustls TLS) connections to an endpoint
//! - Run the HTTP/1.1 client handshake with header case preservation
//! - Drive each connection on its own task, stoppable on discard
//!
//! # Design Decisions
//! - One `ConnectionHandle` owns one upstream socket; dropping the handle
//!   shuts the socket down, so a discarded connection cannot linger
//! - HTTP/1.1 only: one in-flight exchange per connection is what makes the
//!   pool's slot accounting exact

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use hyper::body::Incoming;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls::{self, pki_types::ServerName};
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

use crate::backend::{Endpoint, UpstreamScheme};
use crate::config::ConfigError;
use crate::net::connection::ConnectionId;
use crate::upstream::error::DispatchError;

/// An open HTTP/1.1 connection to the backend.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: SendRequest<Body>,
    shutdown: CancellationToken,
    open: Arc<AtomicUsize>,
}

impl ConnectionHandle {
    /// Connect to `endpoint`. `open` counts live connections of the pool.
    pub async fn open(
        endpoint: &Endpoint,
        tls: Option<&TlsConnector>,
        open: Arc<AtomicUsize>,
    ) -> Result<Self, DispatchError> {
        let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|source| DispatchError::Connect {
                endpoint: endpoint.to_string(),
                source,
            })?;
        if let Err(e) = tcp.set_nodelay(true) {
            tracing::debug!(endpoint = %endpoint, error = %e, "Failed to set TCP_NODELAY");
        }

        let shutdown = CancellationToken::new();
        let sender = match endpoint.scheme {
            UpstreamScheme::Http => handshake(tcp, endpoint, shutdown.clone()).await?,
            UpstreamScheme::Https => {
                let tls_error = |source: io::Error| DispatchError::Tls {
                    endpoint: endpoint.to_string(),
                    source,
                };
                let connector = tls.ok_or_else(|| {
                    tls_error(io::Error::new(io::ErrorKind::Other, "TLS is not configured"))
                })?;
                let name = ServerName::try_from(endpoint.host.clone())
                    .map_err(|e| tls_error(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
                let stream = connector.connect(name, tcp).await.map_err(tls_error)?;
                handshake(stream, endpoint, shutdown.clone()).await?
            }
        };

        open.fetch_add(1, Ordering::SeqCst);
        let id = ConnectionId::new();
        tracing::debug!(connection_id = %id, endpoint = %endpoint, "Upstream connection established");

        Ok(Self {
            id,
            sender,
            shutdown,
            open,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Send one request and wait for the response head.
    pub async fn send(&mut self, request: Request<Body>) -> Result<Response<Incoming>, DispatchError> {
        self.sender.ready().await.map_err(DispatchError::Transport)?;
        self.sender
            .send_request(request)
            .await
            .map_err(DispatchError::Transport)
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.open.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Upstream connection closed");
    }
}

async fn handshake<T>(
    io: T,
    endpoint: &Endpoint,
    shutdown: CancellationToken,
) -> Result<SendRequest<Body>, DispatchError>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let mut builder = http1::Builder::new();
    builder.preserve_header_case(true);
    let (sender, connection) = builder
        .handshake(TokioIo::new(io))
        .await
        .map_err(|source| DispatchError::Handshake {
            endpoint: endpoint.to_string(),
            source,
        })?;

    let endpoint = endpoint.to_string();
    tokio::spawn(async move {
        tokio::select! {
            result = connection => {
                if let Err(e) = result {
                    tracing::debug!(endpoint = %endpoint, error = %e, "Upstream connection ended with error");
                }
            }
            _ = shutdown.cancelled() => {
                tracing::trace!(endpoint = %endpoint, "Upstream connection task stopped");
            }
        }
    });

    Ok(sender)
}

/// TLS client configuration trusting the platform's root certificates.
pub fn tls_connector() -> Result<TlsConnector, ConfigError> {
    let certs = rustls_native_certs::load_native_certs()
        .map_err(|e| ConfigError::Tls(format!("failed to load native certificates: {e}")))?;

    let mut roots = rustls::RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(ConfigError::Tls("no usable root certificates found".to_string()));
    }
    tracing::debug!(added, ignored, "Loaded native root certificates");

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ConfigError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsConnector::from(Arc::new(config)))
}
