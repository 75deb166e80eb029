//! Header policy across the proxy boundary.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers (both directions)
//! - Identify which headers a request signature covers
//! - Optionally add X-Forwarded-For, X-Forwarded-Proto, X-Forwarded-Host
//!
//! # Design Decisions
//! - Headers are copied into a fresh map in their original order; removing
//!   from a `HeaderMap` would reorder entries
//! - Authentication material is never generated or rewritten here

use std::net::SocketAddr;

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

/// Headers meaningful only for a single connection leg.
pub const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
const X_FORWARDED_HOST: &str = "x-forwarded-host";

/// Copy `headers` without hop-by-hop headers, keeping order and bytes.
///
/// Headers named in a `Connection` header are treated as hop-by-hop too.
pub fn without_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let listed = connection_listed(headers);
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name) || listed.iter().any(|l| l == name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

fn connection_listed(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

/// Lower-case names of the headers covered by the request signature.
///
/// Understands SigV4 (`SignedHeaders=` in `Authorization`, or
/// `X-Amz-SignedHeaders` for presigned URLs) and SigV2, whose string to sign
/// covers `Content-MD5`, `Content-Type`, `Date` and every `x-amz-*` header.
pub fn signed_headers(headers: &HeaderMap, query: Option<&str>) -> Vec<String> {
    if let Some(auth) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(list) = sigv4_signed_headers(auth) {
            return split_list(list);
        }
        if auth.starts_with("AWS ") {
            return sigv2_signed_headers(headers);
        }
    }

    query
        .into_iter()
        .flat_map(|q| q.split('&'))
        .find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            key.eq_ignore_ascii_case("X-Amz-SignedHeaders")
                .then(|| urlencoding::decode(value).ok())
                .flatten()
        })
        .map(|list| split_list(&list))
        .unwrap_or_default()
}

fn sigv4_signed_headers(auth: &str) -> Option<&str> {
    if !auth.starts_with("AWS4-") {
        return None;
    }
    let start = auth.find("SignedHeaders=")? + "SignedHeaders=".len();
    let rest = &auth[start..];
    let end = rest.find([',', ' ']).unwrap_or(rest.len());
    Some(&rest[..end])
}

fn sigv2_signed_headers(headers: &HeaderMap) -> Vec<String> {
    let mut names: Vec<String> = ["content-md5", "content-type", "date"]
        .into_iter()
        .filter(|name| headers.contains_key(*name))
        .map(str::to_string)
        .collect();
    for name in headers.keys() {
        if name.as_str().starts_with("x-amz-") && !names.iter().any(|n| n == name.as_str()) {
            names.push(name.as_str().to_string());
        }
    }
    names
}

fn split_list(list: &str) -> Vec<String> {
    list.split(';')
        .map(|h| h.trim().to_ascii_lowercase())
        .filter(|h| !h.is_empty())
        .collect()
}

/// Add X-Forwarded-* headers describing the client leg.
///
/// An existing `X-Forwarded-For` chain is extended; existing
/// `X-Forwarded-Proto` and `X-Forwarded-Host` values are kept.
pub fn append_forwarded(
    headers: &mut HeaderMap,
    client_addr: SocketAddr,
    original_host: Option<&HeaderValue>,
) {
    let client_ip = client_addr.ip().to_string();
    let chain = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.trim().is_empty() => format!("{existing}, {client_ip}"),
        _ => client_ip,
    };
    if let Ok(value) = HeaderValue::from_str(&chain) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    if !headers.contains_key(X_FORWARDED_PROTO) {
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    }

    if let Some(host) = original_host {
        if !headers.contains_key(X_FORWARDED_HOST) {
            headers.insert(X_FORWARDED_HOST, host.clone());
        }
    }
}
