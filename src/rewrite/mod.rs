//! Request rewriting subsystem.
//!
//! # Data Flow
//! ```text
//! InboundRequest (borrowed, never mutated) + UpstreamTarget
//!     → method check (S3 verbs only)
//!     → path check (must percent-decode to UTF-8)
//!     → addressing.rs (path-style / virtual-hosted, Host + path)
//!     → query.rs (verbatim, optional marker, presigned untouched)
//!     → headers.rs (hop-by-hop stripped, signed headers byte-exact)
//!     → OutboundHead
//! ```
//!
//! # Design Decisions
//! - Pure transformation: no I/O, deterministic, unit-testable
//! - Authentication material is passed through, never regenerated
//! - The outbound head is `Clone` so the dispatcher can replay it on retry

pub mod addressing;
pub mod headers;
pub mod query;

use axum::body::Body;
use axum::http::header::{HeaderValue, HOST};
use axum::http::uri::PathAndQuery;
use axum::http::{Extensions, HeaderMap, Method, Request, Uri, Version};

use crate::backend::{AddressingStyle, Endpoint, UpstreamTarget};
use crate::config::RewriteConfig;
use crate::http::request::InboundRequest;

/// Methods S3 accepts. Multipart operations are PUT/POST/DELETE with
/// `uploads`, `uploadId` or `partNumber` in the query.
pub const S3_METHODS: [Method; 6] = [
    Method::GET,
    Method::HEAD,
    Method::PUT,
    Method::POST,
    Method::DELETE,
    Method::OPTIONS,
];

/// Client-caused rewrite failures. Never retried; surfaced as 4xx.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RewriteError {
    #[error("method {0} is not supported by S3")]
    UnsupportedMethod(Method),

    #[error("request path cannot be decoded: {0}")]
    InvalidPath(String),
}

/// Rewriting options, from the `[rewrite]` section.
#[derive(Debug, Clone, Default)]
pub struct RewritePolicy {
    pub query_marker: Option<String>,
    pub forwarded_headers: bool,
    pub preserve_host: bool,
}

impl From<&RewriteConfig> for RewritePolicy {
    fn from(config: &RewriteConfig) -> Self {
        Self {
            query_marker: config.query_marker.clone(),
            forwarded_headers: config.forwarded_headers,
            preserve_host: config.preserve_host,
        }
    }
}

/// Everything about the upstream request except its body.
#[derive(Debug, Clone)]
pub struct OutboundHead {
    pub method: Method,
    pub endpoint: Endpoint,
    pub path_and_query: PathAndQuery,
    pub headers: HeaderMap,
    /// Carries the client's original header casing to the upstream leg.
    pub extensions: Extensions,
}

impl OutboundHead {
    /// Build an origin-form HTTP/1.1 request for this head.
    pub fn to_request(&self, body: Body) -> Request<Body> {
        let mut request = Request::new(body);
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = Uri::from(self.path_and_query.clone());
        *request.version_mut() = Version::HTTP_11;
        *request.headers_mut() = self.headers.clone();
        *request.extensions_mut() = self.extensions.clone();
        request
    }
}

/// An upstream request: a replayable head plus the one-shot body stream.
#[derive(Debug)]
pub struct OutboundRequest {
    pub head: OutboundHead,
    pub body: Body,
}

impl OutboundRequest {
    pub fn new(head: OutboundHead, body: Body) -> Self {
        Self { head, body }
    }
}

/// Project an inbound request onto the upstream target.
pub fn rewrite(
    inbound: &InboundRequest,
    target: &UpstreamTarget,
    policy: &RewritePolicy,
) -> Result<OutboundHead, RewriteError> {
    if !S3_METHODS.contains(&inbound.method) {
        return Err(RewriteError::UnsupportedMethod(inbound.method.clone()));
    }

    let raw_path = inbound.raw_path();
    if !raw_path.starts_with('/') {
        return Err(RewriteError::InvalidPath(raw_path.to_string()));
    }
    urlencoding::decode(raw_path).map_err(|_| RewriteError::InvalidPath(raw_path.to_string()))?;

    let addressed = addressing::address(raw_path, target);

    let path_and_query = match query::outbound_query(inbound.query(), policy.query_marker.as_deref()) {
        Some(q) => format!("{}?{q}", addressed.path),
        None => addressed.path,
    };
    let path_and_query = PathAndQuery::try_from(path_and_query)
        .map_err(|e| RewriteError::InvalidPath(e.to_string()))?;

    let mut headers = headers::without_hop_by_hop(&inbound.headers);
    let inbound_host = inbound.headers.get(HOST);

    let keep_client_host = policy.preserve_host
        && addressed.virtual_bucket.is_none()
        && target.addressing_style == AddressingStyle::Path
        && inbound_host.is_some();
    if !keep_client_host {
        let authority = addressed.endpoint.authority();
        let value = HeaderValue::from_str(&authority)
            .map_err(|_| RewriteError::InvalidPath(authority.clone()))?;
        if inbound_host != Some(&value)
            && headers::signed_headers(&inbound.headers, inbound.query())
                .iter()
                .any(|h| h == "host")
        {
            tracing::warn!(
                request_id = %inbound.request_id,
                client_host = ?inbound_host,
                upstream_host = %authority,
                "Signed Host header rewritten; upstream accepts it only if the client signed for the upstream host"
            );
        }
        headers.insert(HOST, value);
    }

    if policy.forwarded_headers {
        headers::append_forwarded(&mut headers, inbound.client_addr, inbound_host);
    }

    tracing::trace!(
        request_id = %inbound.request_id,
        endpoint = %addressed.endpoint,
        path = %path_and_query,
        "Request rewritten"
    );

    Ok(OutboundHead {
        method: inbound.method.clone(),
        endpoint: addressed.endpoint,
        path_and_query,
        headers,
        extensions: inbound.extensions.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::UpstreamScheme;

    const SIGV4: &str = "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240101/us-east-1/s3/aws4_request, SignedHeaders=content-md5;host;x-amz-content-sha256;x-amz-date;x-amz-meta-Note, Signature=0123456789abcdef";

    fn target(style: AddressingStyle) -> UpstreamTarget {
        UpstreamTarget {
            host: "s3.example.com".into(),
            port: 443,
            scheme: UpstreamScheme::Https,
            addressing_style: style,
            default_bucket: None,
            region: Some("us-east-1".into()),
        }
    }

    fn inbound(method: Method, uri: &str) -> InboundRequest {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("host", "s3.example.com")
            .header("x-amz-date", "20240101T000000Z")
            .header("authorization", SIGV4)
            .header("x-amz-content-sha256", "UNSIGNED-PAYLOAD")
            .header("content-md5", "1B2M2Y8AsgTpgAmY7PhCfg==")
            .header("x-amz-meta-note", "  spaced   value ")
            .header("connection", "keep-alive")
            .header("proxy-authorization", "Basic Zm9vOmJhcg==")
            .body(Body::empty())
            .unwrap();
        InboundRequest::new(request, "192.0.2.10:50000".parse().unwrap())
    }

    #[test]
    fn test_signed_headers_are_byte_identical() {
        let req = inbound(Method::PUT, "/bucket/key.txt");
        let head = rewrite(&req, &target(AddressingStyle::Path), &RewritePolicy::default()).unwrap();

        for name in headers::signed_headers(&req.headers, req.query()) {
            let before: Vec<_> = req.headers.get_all(name.as_str()).iter().collect();
            let after: Vec<_> = head.headers.get_all(name.as_str()).iter().collect();
            assert_eq!(before, after, "{name}");
        }
        assert!(!head.headers.contains_key("connection"));
        assert!(!head.headers.contains_key("proxy-authorization"));
    }

    #[test]
    fn test_header_order_is_preserved() {
        let req = inbound(Method::GET, "/bucket/key.txt");
        let head = rewrite(&req, &target(AddressingStyle::Path), &RewritePolicy::default()).unwrap();
        let names: Vec<_> = head.headers.keys().map(|k| k.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "host",
                "x-amz-date",
                "authorization",
                "x-amz-content-sha256",
                "content-md5",
                "x-amz-meta-note",
            ]
        );
    }

    #[test]
    fn test_virtual_hosted_rewrite() {
        let req = inbound(Method::GET, "/bucket/key");
        let head = rewrite(
            &req,
            &target(AddressingStyle::VirtualHosted),
            &RewritePolicy::default(),
        )
        .unwrap();
        assert_eq!(head.headers["host"], "bucket.s3.example.com");
        assert_eq!(head.path_and_query.as_str(), "/key");
        assert_eq!(head.endpoint.host, "bucket.s3.example.com");
        assert_eq!(head.endpoint.port, 443);
    }

    #[test]
    fn test_path_style_passthrough() {
        let req = inbound(Method::GET, "/bucket/a%2Fb?versionId=3&x=%20");
        let head = rewrite(&req, &target(AddressingStyle::Path), &RewritePolicy::default()).unwrap();
        assert_eq!(head.path_and_query.as_str(), "/bucket/a%2Fb?versionId=3&x=%20");
        assert_eq!(head.headers["host"], "s3.example.com");
        assert_eq!(head.to_request(Body::empty()).uri(), "/bucket/a%2Fb?versionId=3&x=%20");
    }

    #[test]
    fn test_presigned_query_untouched_with_marker() {
        let query = "X-Amz-Expires=900&X-Amz-Algorithm=AWS4-HMAC-SHA256&X-Amz-SignedHeaders=host&X-Amz-Signature=ab";
        let req = inbound(Method::GET, &format!("/bucket/key?{query}"));
        let policy = RewritePolicy {
            query_marker: Some("via=gw".into()),
            ..RewritePolicy::default()
        };
        let head = rewrite(&req, &target(AddressingStyle::Path), &policy).unwrap();
        assert_eq!(head.path_and_query.query(), Some(query));

        let plain = inbound(Method::GET, "/bucket?list-type=2");
        let head = rewrite(&plain, &target(AddressingStyle::Path), &policy).unwrap();
        assert_eq!(head.path_and_query.query(), Some("list-type=2&via=gw"));
    }

    #[test]
    fn test_unsupported_method() {
        let req = inbound(Method::PATCH, "/bucket/key");
        assert_eq!(
            rewrite(&req, &target(AddressingStyle::Path), &RewritePolicy::default()).unwrap_err(),
            RewriteError::UnsupportedMethod(Method::PATCH)
        );
    }

    #[test]
    fn test_undecodable_path() {
        let req = inbound(Method::GET, "/bucket/%FF%FE");
        assert!(matches!(
            rewrite(&req, &target(AddressingStyle::Path), &RewritePolicy::default()),
            Err(RewriteError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_multipart_methods_accepted() {
        for (method, uri) in [
            (Method::POST, "/bucket/big?uploads"),
            (Method::PUT, "/bucket/big?partNumber=1&uploadId=abc"),
            (Method::POST, "/bucket/big?uploadId=abc"),
            (Method::DELETE, "/bucket/big?uploadId=abc"),
        ] {
            let req = inbound(method, uri);
            assert!(rewrite(&req, &target(AddressingStyle::Path), &RewritePolicy::default()).is_ok());
        }
    }

    #[test]
    fn test_preserve_host() {
        let mut req = inbound(Method::GET, "/bucket/key");
        req.headers.insert("host", HeaderValue::from_static("gateway.local:8080"));
        let policy = RewritePolicy {
            preserve_host: true,
            ..RewritePolicy::default()
        };
        let head = rewrite(&req, &target(AddressingStyle::Path), &policy).unwrap();
        assert_eq!(head.headers["host"], "gateway.local:8080");
        assert_eq!(head.endpoint.host, "s3.example.com");
    }

    #[test]
    fn test_forwarded_headers_opt_in() {
        let req = inbound(Method::GET, "/bucket/key");
        let head = rewrite(&req, &target(AddressingStyle::Path), &RewritePolicy::default()).unwrap();
        assert!(!head.headers.contains_key("x-forwarded-for"));

        let policy = RewritePolicy {
            forwarded_headers: true,
            ..RewritePolicy::default()
        };
        let head = rewrite(&req, &target(AddressingStyle::Path), &policy).unwrap();
        assert_eq!(head.headers["x-forwarded-for"], "192.0.2.10");
    }

    #[test]
    fn test_inbound_request_is_not_mutated() {
        let req = inbound(Method::GET, "/bucket/key");
        let before = req.headers.clone();
        let _ = rewrite(&req, &target(AddressingStyle::VirtualHosted), &RewritePolicy::default()).unwrap();
        assert_eq!(req.headers, before);
        assert_eq!(req.uri, "/bucket/key");
    }
}
