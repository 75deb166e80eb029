//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a request may be replayed at all (idempotent method,
//!   empty body)
//! - Track attempts, the last error and the current attempt's deadline
//! - Hand out the backoff delay between attempts
//!
//! # Design Decisions
//! - Never retry PUT/POST/DELETE: replaying them can corrupt upstream data
//! - Only transport failures before any response byte are retried; the
//!   caller classifies errors, this module only counts
//! - A response, whatever its status, ends the retry sequence

use std::time::{Duration, Instant};

use axum::http::Method;

use crate::config::RetryConfig;
use crate::resilience::backoff::Backoff;

/// Idempotent, safe-by-convention S3 methods.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Retry limits and delays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Backoff::default(),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Backoff::from(config),
        }
    }
}

/// Per-dispatch attempt bookkeeping.
#[derive(Debug)]
pub struct RetryState {
    policy: RetryPolicy,
    replayable: bool,
    attempts: u32,
    last_error: Option<String>,
    deadline: Option<Instant>,
}

impl RetryState {
    /// `replayable` is false for requests that must never be sent twice.
    pub fn new(policy: RetryPolicy, replayable: bool) -> Self {
        Self {
            policy,
            replayable,
            attempts: 0,
            last_error: None,
            deadline: None,
        }
    }

    /// Start the next attempt; returns its connect + header deadline.
    pub fn begin_attempt(&mut self, budget: Duration) -> Instant {
        self.attempts += 1;
        let deadline = Instant::now() + budget;
        self.deadline = Some(deadline);
        deadline
    }

    /// Record a failed attempt. Returns the delay before the next attempt,
    /// or `None` when the failure must be surfaced.
    pub fn record_failure(&mut self, error: &impl std::fmt::Display, transient: bool) -> Option<Duration> {
        self.last_error = Some(error.to_string());
        if !(transient && self.replayable) || self.retries() >= self.policy.max_retries {
            return None;
        }
        Some(self.policy.backoff.delay(self.attempts))
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Attempts beyond the first.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}
