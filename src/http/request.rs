//! Inbound request representation.
//!
//! # Responsibilities
//! - Capture the client's request exactly as received (raw path and query,
//!   ordered headers, extensions carrying the original header case)
//! - Assign a request ID for tracing
//!
//! # Design Decisions
//! - The request is never mutated; the rewriter borrows it and builds a
//!   separate outbound head
//! - The body stream moves out only once, when the outbound request is built

use std::net::SocketAddr;

use axum::body::Body;
use axum::http::{request::Parts, Extensions, HeaderMap, Method, Request, Uri, Version};

/// Header carrying the request ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// A client request owned by one in-flight lifecycle.
#[derive(Debug)]
pub struct InboundRequest {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub extensions: Extensions,
    pub body: Body,
    pub client_addr: SocketAddr,
    pub request_id: String,
}

impl InboundRequest {
    /// Wrap a request received by the listener.
    pub fn new(request: Request<Body>, client_addr: SocketAddr) -> Self {
        let (parts, body) = request.into_parts();
        Self::from_parts(parts, body, client_addr)
    }

    pub fn from_parts(parts: Parts, body: Body, client_addr: SocketAddr) -> Self {
        let request_id = parts
            .headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty() && v.len() <= 128)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            extensions: parts.extensions,
            body,
            client_addr,
            request_id,
        }
    }

    /// Raw (still percent-encoded) path.
    pub fn raw_path(&self) -> &str {
        self.uri.path()
    }

    /// Raw query string, exactly as sent.
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Take the body stream, leaving an empty body behind.
    pub fn take_body(&mut self) -> Body {
        std::mem::take(&mut self.body)
    }
}
