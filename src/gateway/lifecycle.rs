//! Per-request lifecycle.
//!
//! ```text
//! Received → Rewritten → Dispatching → Streaming → Completed
//!     └──────────┴────────────┴────────────┴──────→ Failed
//! ```
//!
//! Every request ends in exactly one terminal phase, and reaching it emits
//! the request event (one structured log line plus metrics). A lifecycle
//! dropped early, because the client went away or the server stopped the
//! stream, records `Failed` with reason `cancelled`.

use std::fmt;
use std::time::{Duration, Instant};

use axum::http::{Method, StatusCode};

use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Received,
    Rewritten,
    Dispatching,
    Streaming,
    Completed,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    fn can_advance_to(self, next: Phase) -> bool {
        match (self, next) {
            (Phase::Received, Phase::Rewritten)
            | (Phase::Rewritten, Phase::Dispatching)
            | (Phase::Dispatching, Phase::Streaming)
            | (Phase::Streaming, Phase::Completed) => true,
            (from, Phase::Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Received => "received",
            Phase::Rewritten => "rewritten",
            Phase::Dispatching => "dispatching",
            Phase::Streaming => "streaming",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal lifecycle transition {from} -> {to}")]
pub struct TransitionError {
    pub from: Phase,
    pub to: Phase,
}

/// State of one request, from arrival to its request event.
#[derive(Debug)]
pub struct RequestLifecycle {
    request_id: String,
    method: Method,
    path: String,
    upstream: Option<String>,
    phase: Phase,
    started_at: Instant,
    status: Option<StatusCode>,
    retries: u32,
    bytes_sent: u64,
}

impl RequestLifecycle {
    pub fn new(request_id: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            method,
            path: path.into(),
            upstream: None,
            phase: Phase::Received,
            started_at: Instant::now(),
            status: None,
            retries: 0,
            bytes_sent: 0,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn advance(&mut self, next: Phase) -> Result<(), TransitionError> {
        if !self.phase.can_advance_to(next) {
            return Err(TransitionError {
                from: self.phase,
                to: next,
            });
        }
        tracing::trace!(request_id = %self.request_id, from = %self.phase, to = %next, "Lifecycle transition");
        self.phase = next;
        Ok(())
    }

    /// The outbound request was built for `upstream`.
    pub fn rewritten(&mut self, upstream: impl fmt::Display) -> Result<(), TransitionError> {
        self.advance(Phase::Rewritten)?;
        self.upstream = Some(upstream.to_string());
        Ok(())
    }

    pub fn dispatching(&mut self) -> Result<(), TransitionError> {
        self.advance(Phase::Dispatching)
    }

    /// Response head received from the backend after `retries` retries.
    pub fn streaming(&mut self, status: StatusCode, retries: u32) -> Result<(), TransitionError> {
        self.advance(Phase::Streaming)?;
        self.status = Some(status);
        self.retries = retries;
        Ok(())
    }

    /// The whole body reached the client.
    pub fn complete(&mut self, bytes_sent: u64) -> Result<(), TransitionError> {
        self.advance(Phase::Completed)?;
        self.bytes_sent = bytes_sent;
        self.emit(None);
        Ok(())
    }

    /// End the request unsuccessfully. `status` is what the client saw, if
    /// anything was sent.
    pub fn fail(
        &mut self,
        status: Option<StatusCode>,
        retries: u32,
        reason: &str,
    ) -> Result<(), TransitionError> {
        self.advance(Phase::Failed)?;
        if status.is_some() {
            self.status = status;
        }
        self.retries = self.retries.max(retries);
        self.emit(Some(reason));
        Ok(())
    }

    /// Record bytes relayed so far, reported if the request fails mid-body.
    pub fn set_bytes_sent(&mut self, bytes_sent: u64) {
        self.bytes_sent = bytes_sent;
    }

    fn emit(&self, reason: Option<&str>) {
        let latency = self.started_at.elapsed();
        let outcome = self.phase.as_str();
        let status = self.status.map(|s| s.as_u16()).unwrap_or(0);
        let upstream = self.upstream.as_deref().unwrap_or("-");

        match reason {
            None => tracing::info!(
                request_id = %self.request_id,
                method = %self.method,
                path = %self.path,
                upstream = %upstream,
                outcome,
                status,
                latency_ms = latency.as_millis() as u64,
                retries = self.retries,
                bytes = self.bytes_sent,
                "request"
            ),
            Some(reason) => tracing::warn!(
                request_id = %self.request_id,
                method = %self.method,
                path = %self.path,
                upstream = %upstream,
                outcome,
                status,
                latency_ms = latency.as_millis() as u64,
                retries = self.retries,
                bytes = self.bytes_sent,
                reason,
                "request"
            ),
        }

        metrics::record_request(self.method.as_str(), outcome, status, latency);
    }
}

impl Drop for RequestLifecycle {
    fn drop(&mut self) {
        if !self.phase.is_terminal() {
            let _ = self.fail(None, self.retries, "cancelled");
        }
    }
}
