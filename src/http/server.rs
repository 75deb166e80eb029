//! HTTP server setup.
//!
//! # Responsibilities
//! - Resolve the backend and build the gateway from configuration
//! - Create the Axum router (one catch-all handler plus request tracing)
//! - Serve HTTP/1.1 connections from the bounded listener, preserving
//!   header case
//! - Run the idle connection reaper
//! - Drain connections on shutdown, then cancel what is still running

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, Response};
use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::server::graceful::GracefulShutdown;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;

use crate::backend::resolve;
use crate::config::{ConfigError, GatewayConfig};
use crate::gateway::Gateway;
use crate::http::request::InboundRequest;
use crate::net::{Listener, ListenerError};
use crate::upstream::Dispatcher;

/// The gateway's HTTP front end.
pub struct HttpServer {
    router: Router,
    gateway: Arc<Gateway>,
    config: GatewayConfig,
}

impl HttpServer {
    /// Resolve the upstream and wire every component. Fails on an unusable
    /// upstream definition or missing TLS roots.
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        let target = Arc::new(resolve(&config.upstream)?);
        let dispatcher = Arc::new(Dispatcher::from_config(&config, &target)?);

        tracing::info!(
            upstream = %target,
            addressing_style = %target.addressing_style,
            default_bucket = ?target.default_bucket,
            pool_max_size = config.pool.max_size,
            request_deadline_ms = config.timeouts.request_deadline_ms,
            max_retries = config.retries.max_retries,
            "Gateway configured"
        );

        let gateway = Arc::new(Gateway::new(
            target,
            dispatcher,
            &config,
            CancellationToken::new(),
        ));
        let router = Self::build_router(Arc::clone(&gateway));

        Ok(Self {
            router,
            gateway,
            config,
        })
    }

    fn build_router(gateway: Arc<Gateway>) -> Router {
        Router::new()
            .fallback(gateway_handler)
            .with_state(gateway)
            .layer(TraceLayer::new_for_http())
    }

    pub fn gateway(&self) -> Arc<Gateway> {
        Arc::clone(&self.gateway)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Serve until `shutdown` fires, then drain.
    ///
    /// In-flight requests get `timeouts.shutdown_grace_secs` to finish;
    /// whatever is left after that is cancelled.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Accept)?;
        tracing::info!(address = %addr, "HTTP server starting");

        let root = self.gateway.shutdown_token().clone();
        let reaper = tokio::spawn(Arc::clone(self.gateway.dispatcher()).run_reaper(
            Duration::from_secs(self.config.pool.reap_interval_secs.max(1)),
            root.clone(),
        ));

        let tracker = listener.tracker();
        let graceful = GracefulShutdown::new();
        let mut builder = http1::Builder::new();
        builder
            .timer(TokioTimer::new())
            .preserve_header_case(true)
            .keep_alive(true);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer_addr, slot) = match accepted {
                        Ok(accepted) => accepted,
                        Err(ListenerError::Closed) => break,
                        Err(e) => {
                            tracing::warn!(error = %e, "Accept failed");
                            continue;
                        }
                    };

                    let router = self.router.clone();
                    let service = service_fn(move |mut request: Request<Incoming>| {
                        request.extensions_mut().insert(ConnectInfo(peer_addr));
                        router.clone().oneshot(request)
                    });
                    let connection = graceful.watch(builder.serve_connection(TokioIo::new(stream), service));

                    tokio::spawn(async move {
                        if let Err(e) = connection.await {
                            tracing::debug!(connection_id = %slot.id(), peer_addr = %peer_addr, error = %e, "Client connection ended with error");
                        }
                        drop(slot);
                    });
                }
                _ = shutdown.recv() => {
                    tracing::info!("HTTP server received shutdown signal");
                    break;
                }
            }
        }

        // Stop accepting before draining.
        drop(listener);

        let grace = Duration::from_secs(self.config.timeouts.shutdown_grace_secs);
        tracing::info!(active = tracker.active_count(), grace = ?grace, "Draining client connections");
        tokio::select! {
            _ = graceful.shutdown() => {
                tracing::info!("All client connections drained");
            }
            _ = tokio::time::sleep(grace) => {
                tracing::warn!(active = tracker.active_count(), "Grace period elapsed, cancelling in-flight requests");
            }
        }

        root.cancel();
        let remaining = tracker.drain(Duration::from_secs(1)).await;
        if remaining > 0 {
            tracing::warn!(remaining, "Client connections still open at exit");
        }
        if let Err(e) = reaper.await {
            tracing::error!(error = %e, "Idle reaper task failed");
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn gateway_handler(
    State(gateway): State<Arc<Gateway>>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response<Body> {
    gateway.handle(InboundRequest::new(request, client_addr)).await
}
