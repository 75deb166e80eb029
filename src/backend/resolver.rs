//! Backend resolution.
//!
//! Turns the `[upstream]` section into an [`UpstreamTarget`]. Pure function
//! of configuration; called once at startup.

use crate::backend::target::{AddressingStyle, UpstreamScheme, UpstreamTarget};
use crate::config::{ConfigError, UpstreamConfig};

/// Resolve the upstream configuration into a canonical target.
pub fn resolve(config: &UpstreamConfig) -> Result<UpstreamTarget, ConfigError> {
    let host = config.host.trim();
    if host.is_empty() {
        return Err(ConfigError::MissingHost);
    }
    let host = host.trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase();
    let parse_input = if host.contains(':') {
        format!("[{host}]")
    } else {
        host.clone()
    };
    url::Host::parse(&parse_input).map_err(|e| ConfigError::InvalidHost {
        host: config.host.clone(),
        reason: e.to_string(),
    })?;

    let scheme = parse_scheme(&config.scheme)?;
    let addressing_style = parse_addressing_style(&config.addressing_style)?;

    Ok(UpstreamTarget {
        host,
        port: config.port.unwrap_or_else(|| scheme.default_port()),
        scheme,
        addressing_style,
        default_bucket: config.default_bucket.clone(),
        region: config.region.clone(),
    })
}

fn parse_scheme(value: &str) -> Result<UpstreamScheme, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "http" => Ok(UpstreamScheme::Http),
        "https" => Ok(UpstreamScheme::Https),
        _ => Err(ConfigError::UnknownScheme(value.to_string())),
    }
}

fn parse_addressing_style(value: &str) -> Result<AddressingStyle, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "path" => Ok(AddressingStyle::Path),
        "virtual-hosted" | "virtual" => Ok(AddressingStyle::VirtualHosted),
        _ => Err(ConfigError::UnknownAddressingStyle(value.to_string())),
    }
}
