//! Upstream subsystem.
//!
//! # Data Flow
//! ```text
//! OutboundRequest
//!     → dispatcher.rs (deadline, retries, cancellation)
//!     → pool.rs (slot per in-flight exchange, idle reuse)
//!     → body.rs (signals when the upload has been sent)
//!     → connection.rs (TCP/TLS + HTTP/1.1 handshake)
//!     → Response<Incoming> + PooledConnection
//!         → held by the response streamer until the body ends
//! ```

pub mod body;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod pool;

pub use body::{UploadBody, UploadDone};
pub use connection::{tls_connector, ConnectionHandle};
pub use dispatcher::{Dispatcher, UpstreamResponse};
pub use error::{DispatchError, DispatchFailure};
pub use pool::{ConnectionPool, PoolSettings, PoolStats, PooledConnection};
