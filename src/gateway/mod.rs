//! Gateway subsystem.
//!
//! # Data Flow
//! ```text
//! InboundRequest
//!     → controller.rs (per-request token, orchestration)
//!         → rewrite::rewrite → upstream::Dispatcher::dispatch
//!         → http::response::stream
//!     → lifecycle.rs (phase tracking, request event)
//!     → error.rs (failures before headers → S3 XML error)
//! ```

pub mod controller;
pub mod error;
pub mod lifecycle;

pub use controller::Gateway;
pub use error::GatewayError;
pub use lifecycle::{Phase, RequestLifecycle, TransitionError};
