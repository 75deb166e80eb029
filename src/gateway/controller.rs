//! Request orchestration.
//!
//! # Responsibilities
//! - Drive each request through rewrite → dispatch → stream
//! - Own the per-request cancellation token
//! - Map every failure before response headers to a client response
//!
//! # Design Decisions
//! - The request token is a child of the server-wide shutdown token, so
//!   shutdown reaches every in-flight request
//! - While the handler future is alive a drop guard holds the token; once
//!   headers are returned the guard moves into the response body

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Response;
use tokio_util::sync::CancellationToken;

use crate::backend::UpstreamTarget;
use crate::config::GatewayConfig;
use crate::gateway::error::GatewayError;
use crate::gateway::lifecycle::RequestLifecycle;
use crate::http::request::InboundRequest;
use crate::http::response::{self, StreamSettings};
use crate::rewrite::{rewrite, OutboundRequest, RewritePolicy};
use crate::upstream::{Dispatcher, UpstreamResponse};

/// Everything needed to forward requests to the backend.
#[derive(Debug)]
pub struct Gateway {
    target: Arc<UpstreamTarget>,
    policy: RewritePolicy,
    dispatcher: Arc<Dispatcher>,
    deadline: Duration,
    streaming: StreamSettings,
    shutdown: CancellationToken,
}

impl Gateway {
    pub fn new(
        target: Arc<UpstreamTarget>,
        dispatcher: Arc<Dispatcher>,
        config: &GatewayConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            target,
            policy: RewritePolicy::from(&config.rewrite),
            dispatcher,
            deadline: Duration::from_millis(config.timeouts.request_deadline_ms),
            streaming: StreamSettings::from(&config.streaming),
            shutdown,
        }
    }

    pub fn target(&self) -> &UpstreamTarget {
        &self.target
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Root of all request tokens. Cancelling it aborts in-flight requests.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Forward one client request and build the client response.
    pub async fn handle(&self, mut inbound: InboundRequest) -> Response<Body> {
        let cancel = self.shutdown.child_token();
        let guard = cancel.clone().drop_guard();
        let mut lifecycle = RequestLifecycle::new(
            inbound.request_id.as_str(),
            inbound.method.clone(),
            inbound.raw_path(),
        );

        match self.forward(&mut inbound, &mut lifecycle, &cancel).await {
            Ok(upstream) => {
                guard.disarm();
                response::stream(upstream, lifecycle, self.streaming, cancel)
            }
            Err((error, retries)) => {
                let status = error.status();
                if status.is_server_error() {
                    tracing::error!(
                        request_id = %inbound.request_id,
                        status = status.as_u16(),
                        retries,
                        error = %error,
                        "Request failed before response headers"
                    );
                } else {
                    tracing::debug!(request_id = %inbound.request_id, error = %error, "Rejected request");
                }
                if let Err(e) = lifecycle.fail(Some(status), retries, &error.to_string()) {
                    tracing::error!(request_id = %inbound.request_id, error = %e, "Lifecycle out of order");
                }
                error.into_response(&inbound.request_id)
            }
        }
    }

    async fn forward(
        &self,
        inbound: &mut InboundRequest,
        lifecycle: &mut RequestLifecycle,
        cancel: &CancellationToken,
    ) -> Result<UpstreamResponse, (GatewayError, u32)> {
        let head = rewrite(inbound, &self.target, &self.policy).map_err(|e| (e.into(), 0))?;
        lifecycle.rewritten(&head.endpoint).map_err(|e| (e.into(), 0))?;

        let request = OutboundRequest::new(head, inbound.take_body());
        lifecycle.dispatching().map_err(|e| (e.into(), 0))?;

        let upstream = self
            .dispatcher
            .dispatch(request, self.deadline, cancel)
            .await
            .map_err(|failure| (failure.error.into(), failure.retries))?;

        lifecycle
            .streaming(upstream.response.status(), upstream.retries)
            .map_err(|e| (e.into(), upstream.retries))?;
        Ok(upstream)
    }
}
