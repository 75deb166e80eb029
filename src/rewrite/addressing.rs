//! Path-style and virtual-hosted addressing.

use std::net::Ipv4Addr;

use crate::backend::{AddressingStyle, Endpoint, UpstreamScheme, UpstreamTarget};

/// Where a request goes and what its path becomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addressed {
    pub endpoint: Endpoint,
    /// Raw (still percent-encoded) upstream path.
    pub path: String,
    /// Bucket promoted into the host, if any.
    pub virtual_bucket: Option<String>,
}

/// Map a raw inbound path onto the upstream target.
///
/// The remainder of the path is never decoded or re-encoded, so keys with
/// reserved characters reach the backend exactly as the client sent them.
pub fn address(raw_path: &str, target: &UpstreamTarget) -> Addressed {
    if let Some(bucket) = target.default_bucket.as_deref() {
        if target.addressing_style == AddressingStyle::VirtualHosted
            && virtual_hostable(bucket, target)
        {
            return virtual_hosted(target, bucket, raw_path.to_string());
        }
        return path_style(target, format!("/{bucket}{raw_path}"));
    }

    if target.addressing_style == AddressingStyle::Path {
        return path_style(target, raw_path.to_string());
    }

    let without_slash = raw_path.strip_prefix('/').unwrap_or(raw_path);
    let (segment, rest) = without_slash
        .split_once('/')
        .unwrap_or((without_slash, ""));
    let bucket = match urlencoding::decode(segment) {
        Ok(bucket) if virtual_hostable(&bucket, target) => bucket.into_owned(),
        _ => return path_style(target, raw_path.to_string()),
    };
    virtual_hosted(target, &bucket, format!("/{rest}"))
}

fn path_style(target: &UpstreamTarget, path: String) -> Addressed {
    Addressed {
        endpoint: target.endpoint(),
        path,
        virtual_bucket: None,
    }
}

fn virtual_hosted(target: &UpstreamTarget, bucket: &str, path: String) -> Addressed {
    Addressed {
        endpoint: target.bucket_endpoint(bucket),
        path,
        virtual_bucket: Some(bucket.to_string()),
    }
}

/// Whether `bucket` can be moved into the host name.
///
/// Buckets with dots are kept path-style over HTTPS: a wildcard certificate
/// for `*.host` does not match `a.b.host`.
fn virtual_hostable(bucket: &str, target: &UpstreamTarget) -> bool {
    !target.host_is_ip()
        && is_dns_compatible(bucket)
        && !(target.scheme == UpstreamScheme::Https && bucket.contains('.'))
}

/// DNS-compatible S3 bucket name.
pub fn is_dns_compatible(bucket: &str) -> bool {
    let bytes = bucket.as_bytes();
    if !(3..=63).contains(&bytes.len()) {
        return false;
    }
    let valid_chars = bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'.' || *b == b'-');
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    valid_chars
        && alnum(bytes[0])
        && alnum(bytes[bytes.len() - 1])
        && !bucket.contains("..")
        && !bucket.contains(".-")
        && !bucket.contains("-.")
        && bucket.parse::<Ipv4Addr>().is_err()
}
