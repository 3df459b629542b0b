use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A rate limit policy failed validation. Raised at construction
    /// time only, never per request.
    #[error("invalid rate limit policy: {0}")]
    InvalidPolicy(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// The shared counter store could not be reached or answered with a
    /// protocol error. Absorbed by the decision engine; callers of
    /// `RateLimiter::check` never see it.
    #[error("counter store unavailable: {0}")]
    BackendUnavailable(String),
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::BackendUnavailable(err.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            Error::InvalidPolicy(_) => (StatusCode::BAD_REQUEST, "invalid_policy"),
            Error::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error"),
            Error::BackendUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable"),
        };

        let body = Json(serde_json::json!({
            "error": kind,
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}
