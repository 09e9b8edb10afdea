//! Request logging shared by both listeners.

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request};
use axum::http::header::{CONTENT_LENGTH, USER_AGENT};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

pub async fn log_requests(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let ip = real_ip(req.headers(), peer);
    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let response = next.run(req).await;

    let size = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    tracing::info!(
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        size,
        took_ms = started.elapsed().as_millis() as u64,
        ip = %ip,
        user_agent = %user_agent,
        "http request"
    );
    response
}

/// Client address: `X-Real-IP`, else the first `X-Forwarded-For` entry,
/// else the TCP peer.
pub fn real_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !ip.is_empty() {
            return ip.to_string();
        }
    }
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        let first = forwarded.split(',').next().unwrap_or("").trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    match peer {
        Some(addr) => addr.ip().to_string(),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> Option<SocketAddr> {
        Some("10.1.2.3:4567".parse().unwrap())
    }

    #[test]
    fn test_real_ip_prefers_x_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.9"));
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("198.51.100.1, 10.0.0.1"),
        );
        assert_eq!(real_ip(&headers, peer()), "203.0.113.9");
    }

    #[test]
    fn test_real_ip_takes_first_forwarded_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("198.51.100.1, 10.0.0.1"),
        );
        assert_eq!(real_ip(&headers, peer()), "198.51.100.1");
    }

    #[test]
    fn test_real_ip_falls_back_to_peer() {
        assert_eq!(real_ip(&HeaderMap::new(), peer()), "10.1.2.3");
        assert_eq!(real_ip(&HeaderMap::new(), None), "-");
    }
}
