use axum::http::{header::HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// The error taxonomy the HTTP surface exposes. Downstream failures are
/// mapped into one of these; stack traces and driver errors never reach the
/// caller.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("missing or invalid credentials")]
    Unauthorized,

    #[error("insufficient scope")]
    Forbidden,

    #[error("rate limit exceeded")]
    RateLimited { limit: i64, reset_at: i64 },

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        ApiError::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError::NotFound(msg.into())
    }

    fn code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            ApiError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Internal(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = self.code();

        let message = match &self {
            ApiError::Internal(e) => {
                error!(error = ?e, "internal error while handling request");
                "something went wrong".to_string()
            }
            other => other.to_string(),
        };

        let mut response = (status, Json(json!({ "error": error, "message": message })))
            .into_response();

        if let ApiError::RateLimited { limit, reset_at } = self {
            let headers = response.headers_mut();
            headers.insert(
                HeaderName::from_static("x-ratelimit-limit"),
                header_num(limit),
            );
            headers.insert(
                HeaderName::from_static("x-ratelimit-remaining"),
                HeaderValue::from_static("0"),
            );
            headers.insert(
                HeaderName::from_static("x-ratelimit-reset"),
                header_num(reset_at),
            );
        }

        response
    }
}

fn header_num(n: i64) -> HeaderValue {
    HeaderValue::from_str(&n.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_taxonomy() {
        assert_eq!(
            ApiError::validation("bad period").code().0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::Unauthorized.code().0, StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::conflict("pubkey already registered").code().0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::RateLimited { limit: 100, reset_at: 0 }.code().0,
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn rate_limit_response_carries_reset_headers() {
        let response = ApiError::RateLimited {
            limit: 100,
            reset_at: 1_700_003_600,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
        assert_eq!(response.headers()["x-ratelimit-reset"], "1700003600");
    }
}
