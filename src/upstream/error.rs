//! Upstream dispatch errors.

use std::error::Error as _;
use std::io;
use std::time::Duration;

/// Failure to obtain response headers from the backend.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no free connection to {endpoint} within {waited:?}")]
    PoolExhausted { endpoint: String, waited: Duration },

    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        source: io::Error,
    },

    #[error("TLS handshake with {endpoint} failed: {source}")]
    Tls {
        endpoint: String,
        source: io::Error,
    },

    #[error("HTTP handshake with {endpoint} failed: {source}")]
    Handshake {
        endpoint: String,
        source: hyper::Error,
    },

    #[error("upstream exchange failed: {0}")]
    Transport(#[source] hyper::Error),

    #[error("upstream did not send response headers before the deadline")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,
}

impl DispatchError {
    /// Transport-level failures that happened before any response byte.
    /// Only these may be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            DispatchError::Cancelled => false,
            DispatchError::Transport(e) => {
                e.is_incomplete_message() || e.is_canceled() || e.is_closed() || is_reset(e)
            }
            _ => true,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::PoolExhausted { .. } => "pool_exhausted",
            DispatchError::Connect { .. } => "connect",
            DispatchError::Tls { .. } => "tls",
            DispatchError::Handshake { .. } => "handshake",
            DispatchError::Transport(_) => "transport",
            DispatchError::Timeout => "timeout",
            DispatchError::Cancelled => "cancelled",
        }
    }
}

/// A dispatch that ended without a response, after `retries` retries.
#[derive(Debug, thiserror::Error)]
#[error("{error} (after {retries} retries)")]
pub struct DispatchFailure {
    pub error: DispatchError,
    pub retries: u32,
}

/// A connection dropped by the peer, found anywhere in the source chain.
/// Parse errors are not resets: response bytes already arrived.
fn is_reset(error: &hyper::Error) -> bool {
    let mut source = error.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<io::Error>() {
            return matches!(
                io.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            );
        }
        source = cause.source();
    }
    false
}
