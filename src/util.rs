//! Shared request helpers.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap};

/// Key used when no client address can be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// First address from `x-forwarded-for`, or `x-real-ip`. Blank values are
/// skipped.
pub fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    first_entry(headers, "x-forwarded-for").or_else(|| first_entry(headers, "x-real-ip"))
}

fn first_entry(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Identify the client for rate limiting.
///
/// Forwarding headers are only honoured when `trust_proxy_headers` is set,
/// since any client can send them.
pub fn client_key(
    headers: &HeaderMap,
    extensions: &Extensions,
    trust_proxy_headers: bool,
) -> String {
    if trust_proxy_headers && let Some(ip) = forwarded_ip(headers) {
        return ip;
    }

    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}
