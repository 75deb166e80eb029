//! Upstream target descriptor.

use std::fmt;

/// How the bucket is identified in upstream requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingStyle {
    /// `https://host/bucket/key`
    Path,
    /// `https://bucket.host/key`
    VirtualHosted,
}

impl fmt::Display for AddressingStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressingStyle::Path => f.write_str("path"),
            AddressingStyle::VirtualHosted => f.write_str("virtual-hosted"),
        }
    }
}

/// Transport scheme spoken to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpstreamScheme {
    Http,
    Https,
}

impl UpstreamScheme {
    pub fn default_port(self) -> u16 {
        match self {
            UpstreamScheme::Http => 80,
            UpstreamScheme::Https => 443,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UpstreamScheme::Http => "http",
            UpstreamScheme::Https => "https",
        }
    }
}

impl fmt::Display for UpstreamScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The resolved backend every request is forwarded to.
///
/// Built once at startup and shared read-only (`Arc<UpstreamTarget>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    pub host: String,
    pub port: u16,
    pub scheme: UpstreamScheme,
    pub addressing_style: AddressingStyle,
    pub default_bucket: Option<String>,
    pub region: Option<String>,
}

impl UpstreamTarget {
    /// `host[:port]`, omitting the scheme's default port.
    pub fn authority(&self) -> String {
        self.endpoint().authority()
    }

    /// Where path-style requests are sent.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            scheme: self.scheme,
        }
    }

    /// Where virtual-hosted requests for `bucket` are sent.
    pub fn bucket_endpoint(&self, bucket: &str) -> Endpoint {
        Endpoint {
            host: format!("{bucket}.{}", self.host),
            port: self.port,
            scheme: self.scheme,
        }
    }

    /// True when the upstream host is an IP literal rather than a DNS name.
    pub fn host_is_ip(&self) -> bool {
        self.host.parse::<std::net::IpAddr>().is_ok()
    }
}

/// A concrete (host, port, scheme) to open connections to.
///
/// Doubles as the connection pool key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub scheme: UpstreamScheme,
}

impl Endpoint {
    /// Value for the Host header: `host[:port]`, omitting the default port.
    pub fn authority(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == self.scheme.default_port() {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority())
    }
}

impl fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(port: u16, scheme: UpstreamScheme) -> UpstreamTarget {
        UpstreamTarget {
            host: "s3.example.com".into(),
            port,
            scheme,
            addressing_style: AddressingStyle::VirtualHosted,
            default_bucket: None,
            region: None,
        }
    }

    #[test]
    fn test_authority_omits_default_port() {
        assert_eq!(target(443, UpstreamScheme::Https).authority(), "s3.example.com");
        assert_eq!(target(80, UpstreamScheme::Http).authority(), "s3.example.com");
        assert_eq!(
            target(9000, UpstreamScheme::Http).authority(),
            "s3.example.com:9000"
        );
    }

    #[test]
    fn test_bucket_endpoint() {
        let endpoint = target(9000, UpstreamScheme::Http).bucket_endpoint("photos");
        assert_eq!(endpoint.authority(), "photos.s3.example.com:9000");
        assert_eq!(endpoint.to_string(), "http://photos.s3.example.com:9000");
    }

    #[test]
    fn test_ipv6_authority_is_bracketed() {
        let mut t = target(9000, UpstreamScheme::Http);
        t.host = "::1".into();
        assert_eq!(t.authority(), "[::1]:9000");
    }
}
