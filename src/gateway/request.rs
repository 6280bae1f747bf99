//! Inbound request view used by the gateway pipeline.

use axum::body::Bytes;
use axum::http::{header, HeaderMap, Method, Uri};
use std::net::{IpAddr, SocketAddr};

/// A fully buffered inbound request plus the caller's address.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Socket peer, when known.
    pub peer: Option<SocketAddr>,
    /// Resolved client IP. The socket peer unless the peer is a trusted proxy.
    pub client_ip: String,
}

impl InboundRequest {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes, peer: Option<SocketAddr>) -> Self {
        let client_ip = client_ip(&headers, peer, &[]);
        Self {
            method,
            uri,
            headers,
            body,
            peer,
            client_ip,
        }
    }

    /// Re-resolve `client_ip`, honoring forwarding headers set by `trusted` proxies.
    pub fn trust_proxies(mut self, trusted: &[IpAddr]) -> Self {
        self.client_ip = client_ip(&self.headers, self.peer, trusted);
        self
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Host header, lowercased, without the port.
    pub fn host(&self) -> Option<String> {
        let raw = self.headers.get(header::HOST)?.to_str().ok()?;
        let host = match raw.rsplit_once(':') {
            Some((name, port)) if !name.ends_with(']') && port.chars().all(|c| c.is_ascii_digit()) => {
                name
            }
            _ => raw,
        };
        Some(host.to_ascii_lowercase())
    }

    /// Raw bearer credential, if any.
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(header::AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Address of the caller.
///
/// Forwarding headers are only believed when the socket peer is in
/// `trusted`. `X-Forwarded-For` is walked from the nearest hop outwards and
/// the first address that is not itself a trusted proxy wins; `X-Real-IP`
/// is used when there is no `X-Forwarded-For`.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trusted: &[IpAddr]) -> String {
    let Some(peer) = peer.map(|p| p.ip()) else {
        return "unknown".to_string();
    };
    if !trusted.contains(&peer) {
        return peer.to_string();
    }

    let hops: Vec<IpAddr> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|hop| hop.trim().parse().ok())
        .collect();
    if let Some(&first) = hops.first() {
        let client = hops
            .iter()
            .rev()
            .find(|hop| !trusted.contains(hop))
            .copied()
            .unwrap_or(first);
        return client.to_string();
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
        .unwrap_or(peer)
        .to_string()
}
