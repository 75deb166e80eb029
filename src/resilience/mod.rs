//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatch attempt fails before any response byte:
//!     → retries.rs (replayable? transient? budget left?)
//!     → backoff.rs (exponential delay with ±jitter)
//!     → next attempt with a fresh connect + header deadline
//! ```
//!
//! # Design Decisions
//! - Every upstream exchange has a deadline covering connect and headers
//! - Body streaming is never bounded by that deadline
//! - Retries only for idempotent requests without a body

pub mod backoff;
pub mod retries;

pub use backoff::Backoff;
pub use retries::{is_idempotent, RetryPolicy, RetryState};
