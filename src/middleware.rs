use axum::extract::ConnectInfo;
use axum::{extract::Request, middleware::Next, response::Response};
use std::net::SocketAddr;
use tracing::info;

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client = client_identifier(&request);

    info!(
        target: "limitgate::middleware",
        method = %method,
        uri = %uri,
        client = %client,
        "Incoming request"
    );

    let response = next.run(request).await;

    info!(
        target: "limitgate::middleware",
        method = %method,
        uri = %uri,
        status = %response.status(),
        "Request completed"
    );

    response
}

/// Best-effort client identifier for budgeting, typically an IP.
///
/// Prefers proxy headers, then the peer socket address. The `unknown`
/// sentinel is last resort only; every caller it matches shares one
/// budget, so the extraction chain ahead of it should almost always
/// produce something.
pub fn client_identifier(request: &Request) -> String {
    if let Some(from_headers) = client_identifier_from_headers(request.headers()) {
        return from_headers;
    }

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    "unknown".to_string()
}

/// Client address from proxy headers alone, if any.
pub fn client_identifier_from_headers(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                let first_ip = first_ip.trim();
                if !first_ip.is_empty() {
                    return Some(first_ip.to_string());
                }
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            if !ip_str.is_empty() {
                return Some(ip_str.to_string());
            }
        }
    }

    None
}
