//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (net::Listener)
//!     → server.rs (hyper HTTP/1.1, header case preserved, Axum router)
//!     → request.rs (InboundRequest, request ID)
//!     → gateway::Gateway::handle
//!     → response.rs (status + headers, streamed body)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{InboundRequest, X_REQUEST_ID};
pub use response::{stream, StreamError, StreamSettings, StreamingBody};
pub use server::HttpServer;
