use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::HeaderMap;

/// Resolve the client IP for rate-limiting and ban checks. With
/// `trust_proxy` the left-most `X-Forwarded-For` entry wins (the gateway is
/// assumed to sit behind a single trusted reverse proxy); otherwise the
/// socket's peer address is used.
pub fn client_ip(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(value) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            if let Some(first) = value.split(',').next() {
                let trimmed = first.trim();
                if !trimmed.is_empty() {
                    return trimmed.to_string();
                }
            }
        }
    }
    connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()).unwrap_or_else(|| "unknown".to_string())
}
