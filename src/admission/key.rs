//! Client identity derivation.

use axum::http::{HeaderMap, HeaderName};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::config::AdmissionConfig;
use crate::error::Result;

/// Textual form of the sentinel key shared by requests with no usable address.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// The identity requests are grouped under for rate limiting.
///
/// Addresses are stored in canonical form (IPv4-mapped IPv6 collapses to
/// IPv4, no port), so two requests from the same host always share a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKey {
    /// A parsed client address
    Addr(IpAddr),
    /// Requests whose address could not be determined
    Unknown,
}

impl ClientKey {
    pub fn from_ip(ip: IpAddr) -> Self {
        ClientKey::Addr(ip.to_canonical())
    }

    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self::from_ip(addr.ip())
    }

    /// Parse an address as it appears on the wire.
    ///
    /// Accepts `1.2.3.4`, `1.2.3.4:80`, `::1`, `[::1]` and `[::1]:80`.
    /// Anything else becomes [`ClientKey::Unknown`].
    pub fn parse(text: &str) -> Self {
        Self::try_parse(text).unwrap_or(ClientKey::Unknown)
    }

    pub(crate) fn try_parse(text: &str) -> Option<Self> {
        let text = text.trim();

        if let Ok(ip) = text.parse::<IpAddr>() {
            return Some(Self::from_ip(ip));
        }
        if let Ok(addr) = text.parse::<SocketAddr>() {
            return Some(Self::from_socket_addr(addr));
        }

        text.strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .and_then(|inner| inner.parse::<IpAddr>().ok())
            .map(Self::from_ip)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, ClientKey::Unknown)
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientKey::Addr(ip) => write!(f, "{}", ip),
            ClientKey::Unknown => f.write_str(UNKNOWN_CLIENT),
        }
    }
}

/// Derives a [`ClientKey`] from a request's remote address and headers.
///
/// In trusted-proxy mode the first entry of the forwarded header wins over
/// the socket address. Only enable that when every request arrives through a
/// proxy that overwrites the header: a directly reachable service lets
/// clients pick their own key by forging it.
#[derive(Debug, Clone, Default)]
pub struct KeyExtractor {
    forwarded_header: Option<HeaderName>,
}

impl KeyExtractor {
    /// Key by the socket address only.
    pub fn direct() -> Self {
        Self::default()
    }

    /// Prefer the first address in `header`, falling back to the socket address.
    pub fn trusting(header: HeaderName) -> Self {
        Self {
            forwarded_header: Some(header),
        }
    }

    pub fn from_config(config: &AdmissionConfig) -> Result<Self> {
        if config.trusted_proxy {
            Ok(Self::trusting(config.forwarded_header_name()?))
        } else {
            Ok(Self::direct())
        }
    }

    pub fn forwarded_header(&self) -> Option<&HeaderName> {
        self.forwarded_header.as_ref()
    }

    /// Derive the key for a request. Never fails.
    pub fn extract(&self, remote: Option<SocketAddr>, headers: &HeaderMap) -> ClientKey {
        if let Some(header) = &self.forwarded_header {
            let forwarded = headers
                .get(header)
                .and_then(|value| value.to_str().ok())
                .and_then(first_forwarded);
            if let Some(key) = forwarded {
                return key;
            }
        }

        remote
            .map(ClientKey::from_socket_addr)
            .unwrap_or(ClientKey::Unknown)
    }
}

fn first_forwarded(value: &str) -> Option<ClientKey> {
    value.split(',').next().and_then(ClientKey::try_parse)
}
