//! Endpoint URL validation for live connections
//!
//! Builds the WebSocket URL a live client connects to. It ensures URLs:
//! - Use the `wss` scheme (plain `ws` only for loopback hosts, when allowed)
//! - Have a host
//! - Carry the API key as the `key` query parameter

use std::net::IpAddr;

use thiserror::Error;
use tracing::warn;
use url::Url;

/// Errors that can occur during endpoint validation
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(#[from] url::ParseError),

    #[error("URL scheme must be wss, got: {0}")]
    SecureSchemeRequired(String),

    #[error("URL must have a host")]
    MissingHost,

    #[error("API key must not be empty")]
    MissingApiKey,
}

/// Checks whether a parsed URL points at the local machine.
pub fn is_loopback_host(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
        Some(url::Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
        None => false,
    }
}

/// Validates a live endpoint URL.
///
/// # Arguments
/// * `url` - The URL string to validate
/// * `allow_insecure_localhost` - Whether `ws://` is accepted for loopback hosts
pub fn validate_endpoint_url(
    url: &str,
    allow_insecure_localhost: bool,
) -> Result<Url, EndpointError> {
    let parsed = Url::parse(url)?;

    if parsed.host_str().is_none() {
        return Err(EndpointError::MissingHost);
    }

    match parsed.scheme() {
        "wss" => Ok(parsed),
        "ws" if allow_insecure_localhost && is_loopback_host(&parsed) => Ok(parsed),
        scheme => {
            warn!(url = %parsed.host_str().unwrap_or_default(), scheme, "Rejected live endpoint scheme");
            Err(EndpointError::SecureSchemeRequired(scheme.to_string()))
        }
    }
}

/// Builds the connection URL: the validated endpoint with `key=<api_key>`
/// appended to its query string.
///
/// # Example
/// ```rust,ignore
/// use live_voice_client::utils::endpoint::build_connection_url;
///
/// let url = build_connection_url("wss://host/ws", "k", false).unwrap();
/// assert_eq!(url.as_str(), "wss://host/ws?key=k");
/// ```
pub fn build_connection_url(
    url: &str,
    api_key: &str,
    allow_insecure_localhost: bool,
) -> Result<Url, EndpointError> {
    if api_key.trim().is_empty() {
        return Err(EndpointError::MissingApiKey);
    }

    let mut parsed = validate_endpoint_url(url, allow_insecure_localhost)?;
    parsed.query_pairs_mut().append_pair("key", api_key);
    Ok(parsed)
}
