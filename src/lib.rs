//! S3 gateway library.
//!
//! A reverse proxy in front of one S3-compatible endpoint: requests are
//! rewritten for the backend's addressing style, forwarded over pooled
//! HTTP/1.1 connections with deadlines and retries, and their bodies are
//! streamed in both directions without buffering.

pub mod backend;
pub mod config;
pub mod gateway;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod rewrite;
pub mod upstream;

pub use config::schema::GatewayConfig;
pub use gateway::Gateway;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
