//! Request forwarding to an upstream HTTP server

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, Request},
    response::{IntoResponse, Response},
};
use http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use reqwest::Client;
use tracing::{debug, warn};

/// Largest request body the proxy will forward
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Forward `request` to `upstream` and relay the answer.
///
/// Connection failures map to 502 and timeouts to 504 so that a dead
/// upstream fails health checks fast instead of hanging them.
pub async fn forward(client: &Client, upstream: &str, timeout: Duration, request: Request) -> Response {
    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);

    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", upstream.trim_end_matches('/'), path_and_query);

    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Rejecting request body for {}: {}", url, e);
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
        }
    };

    let headers = upstream_headers(&parts.headers, client_addr);
    debug!("Forwarding {} {}", parts.method, url);

    let result = client
        .request(parts.method, &url)
        .headers(headers)
        .timeout(timeout)
        .body(body)
        .send()
        .await;

    let response = match result {
        Ok(response) => response,
        Err(e) if e.is_timeout() => {
            warn!("Upstream {} timed out after {:?}", url, timeout);
            return (StatusCode::GATEWAY_TIMEOUT, "upstream timed out").into_response();
        }
        Err(e) => {
            warn!("Upstream {} unreachable: {}", url, e);
            return (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response();
        }
    };

    let status = response.status();
    let response_headers = strip_hop_by_hop(response.headers());
    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) if e.is_timeout() => {
            return (StatusCode::GATEWAY_TIMEOUT, "upstream timed out").into_response();
        }
        Err(e) => {
            warn!("Failed to read upstream body from {}: {}", url, e);
            return (StatusCode::BAD_GATEWAY, "upstream body error").into_response();
        }
    };

    let mut relayed = Response::new(Body::from(bytes));
    *relayed.status_mut() = status;
    *relayed.headers_mut() = response_headers;
    relayed
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name) || name == header::CONTENT_LENGTH {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Headers sent upstream: the client's minus hop-by-hop, plus the
/// `X-Real-IP` / `X-Forwarded-*` set
fn upstream_headers(incoming: &HeaderMap, client_addr: Option<SocketAddr>) -> HeaderMap {
    let mut headers = strip_hop_by_hop(incoming);
    headers.remove(header::HOST);

    if let Some(host) = incoming.get(header::HOST) {
        headers.insert(X_FORWARDED_HOST, host.clone());
    }
    if !headers.contains_key(&X_FORWARDED_PROTO) {
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    }

    if let Some(addr) = client_addr {
        let ip = addr.ip().to_string();
        let forwarded_for = match incoming.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) if !existing.is_empty() => format!("{}, {}", existing, ip),
            _ => ip.clone(),
        };
        if let Ok(value) = HeaderValue::from_str(&ip) {
            headers.insert(X_REAL_IP, value);
        }
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }

    headers
}
