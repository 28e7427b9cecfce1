//! Identifier extraction and classification for inbound requests.

use std::net::{IpAddr, SocketAddr};

use axum::http::header::{HeaderMap, HeaderName};
use tracing::debug;

use crate::error::{RatewallError, Result};
use crate::ratelimit::ClientClass;

/// Identifier used when the request carries no usable caller address.
pub const UNKNOWN_ADDRESS: &str = "unknown";

/// Headers a trusted proxy may set, in order of preference.
const PROXY_ADDRESS_HEADERS: [&str; 2] = ["true-client-ip", "x-real-ip"];
const FORWARDED_FOR: &str = "x-forwarded-for";

/// Who a request is rate limited as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Credential token or caller host
    pub identifier: String,
    /// Quota namespace the identifier is evaluated under
    pub class: ClientClass,
}

/// Derives a [`ClientIdentity`] from request headers and the peer address.
#[derive(Debug, Clone)]
pub struct IdentityExtractor {
    credential_header: HeaderName,
    trust_proxy: bool,
}

impl IdentityExtractor {
    /// Create an extractor reading credentials from `credential_header`.
    pub fn new(credential_header: &str, trust_proxy: bool) -> Result<Self> {
        let credential_header = HeaderName::from_bytes(credential_header.to_ascii_lowercase().as_bytes())
            .map_err(|e| {
                RatewallError::Config(format!(
                    "invalid credential header name '{}': {}",
                    credential_header, e
                ))
            })?;

        Ok(Self {
            credential_header,
            trust_proxy,
        })
    }

    /// The header credentials are read from.
    pub fn credential_header(&self) -> &HeaderName {
        &self.credential_header
    }

    /// Classify a request.
    ///
    /// A non-empty credential header makes the token the identifier.
    /// Otherwise the caller's host is used, or the raw address when it has no
    /// host/port form.
    pub fn identify(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientIdentity {
        let token = headers
            .get(&self.credential_header)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .filter(|t| !t.is_empty());
        let class = ClientClass::from_credential(token.is_some());

        let identifier = match token {
            Some(token) => token,
            None => self.address_identifier(headers, peer),
        };

        ClientIdentity { identifier, class }
    }

    fn address_identifier(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        let address = remote_address(headers, peer, self.trust_proxy);
        match split_host(&address) {
            Some(host) => host.to_string(),
            None => {
                debug!(address = %address, "Could not split caller address, using it verbatim");
                address
            }
        }
    }
}

/// The caller's address as a string, as the server would report it.
///
/// With `trust_proxy`, a valid IP in `True-Client-IP`, `X-Real-IP` or the
/// first `X-Forwarded-For` entry replaces the peer address. Proxy-supplied
/// addresses carry no port.
pub fn remote_address(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(ip) = proxy_address(headers) {
            return ip.to_string();
        }
    }

    peer.map(|addr| addr.to_string())
        .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string())
}

fn proxy_address(headers: &HeaderMap) -> Option<IpAddr> {
    let parse = |value: &str| value.trim().parse::<IpAddr>().ok();

    for name in PROXY_ADDRESS_HEADERS {
        if let Some(ip) = headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(parse)
        {
            return Some(ip);
        }
    }

    headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(parse)
}

/// Host portion of a `host:port` or `[host]:port` address.
///
/// Returns `None` when the address has no port or is otherwise malformed.
pub fn split_host(address: &str) -> Option<&str> {
    if let Some(rest) = address.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        after.strip_prefix(':')?;
        return Some(host);
    }

    let (host, _port) = address.rsplit_once(':')?;
    if host.contains(':') {
        // Bare IPv6 without brackets is ambiguous.
        return None;
    }
    Some(host)
}
