use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::middleware::client_identifier_from_headers;
use crate::policy::RateLimitConfig;
use crate::rate_limiter::{RateLimitDecision, RateLimiter};

/// Shared application state
pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    pub default_policy: RateLimitConfig,
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    /// Identifier to budget against. Falls back to the client address
    /// when absent, and to the `unknown` sentinel after that.
    #[serde(default)]
    pub identifier: Option<String>,
    /// Policy name for the counter namespace. Defaults to `default`.
    #[serde(default)]
    pub policy: Option<String>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub window_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub identifier: String,
    #[serde(flatten)]
    pub decision: RateLimitDecision,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub redis_configured: bool,
    pub redis_connected: bool,
    pub local_entries: usize,
}

/// Count one request and answer with the decision plus the rate limit
/// header contract. Denied checks answer 429 with `Retry-After`.
pub async fn check(
    State(state): State<SharedState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(payload): Json<CheckRequest>,
) -> Result<impl IntoResponse, Error> {
    let config = resolve_policy(&state, &payload)?;

    let identifier = payload
        .identifier
        .filter(|id| !id.is_empty())
        .or_else(|| client_identifier_from_headers(&headers))
        .or_else(|| peer.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string());

    let decision = state.limiter.check(&identifier, &config).await;

    let mut response = Json(CheckResponse {
        identifier,
        decision: decision.clone(),
    })
    .into_response();

    if !decision.allowed {
        *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    }

    let headers = response.headers_mut();
    headers.insert("X-RateLimit-Limit", decision.limit.into());
    headers.insert("X-RateLimit-Remaining", decision.remaining.into());
    headers.insert("X-RateLimit-Reset", decision.reset_at_ms.into());

    if !decision.allowed {
        if let Some(retry_after) = decision.retry_after_secs {
            headers.insert("Retry-After", retry_after.into());
        }
    }

    Ok(response)
}

/// Turn request overrides into a validated policy, defaulting to the
/// configured one. Invalid overrides are a caller error, answered 400.
fn resolve_policy(state: &AppState, payload: &CheckRequest) -> Result<RateLimitConfig, Error> {
    if payload.limit.is_none() && payload.window_secs.is_none() && payload.policy.is_none() {
        return Ok(state.default_policy.clone());
    }

    let name = payload
        .policy
        .clone()
        .unwrap_or_else(|| state.default_policy.name.clone());
    let limit = payload.limit.unwrap_or(state.default_policy.limit);
    let window = payload
        .window_secs
        .map(Duration::from_secs)
        .unwrap_or(state.default_policy.window);

    RateLimitConfig::new(name, limit, window)
}

/// The configured default policy.
pub async fn default_policy(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.default_policy.clone())
}

/// Health check endpoint. Running without Redis is degraded, not
/// unhealthy; the limiter still decides from the local store.
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    let redis_configured = state.limiter.shared_configured();
    let redis_connected = state.limiter.shared_available().await;

    let status = if !redis_configured || redis_connected {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        redis_configured,
        redis_connected,
        local_entries: state.limiter.local_entries(),
    })
}

/// Readiness check endpoint
pub async fn readiness_check(State(state): State<SharedState>) -> impl IntoResponse {
    let redis_connected = state.limiter.shared_available().await;

    if redis_connected {
        Json(serde_json::json!({
            "status": "ready",
            "redis": "connected"
        }))
    } else {
        Json(serde_json::json!({
            "status": "ready",
            "redis": "disconnected",
            "note": "Running in local-only mode"
        }))
    }
}
