//! Error types for the feed service.
//!
//! Errors are converted to protocol-shaped JSON responses. Transient
//! external failures never surface here: pipeline steps catch them and
//! degrade to empty results.

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use std::fmt;

/// Result type for feed-service operations
pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug)]
pub enum AppError {
    /// Requested feed URI does not belong to this generator
    UnsupportedAlgorithm(String),

    /// Requester is not on the serve whitelist
    AccountRestricted(String),

    /// Missing or unusable requester identity
    Unauthorized(String),

    /// Malformed request input
    BadRequest(String),

    /// Database operation failed
    DatabaseError(String),

    /// Internal server error
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::UnsupportedAlgorithm(msg) => write!(f, "Unsupported algorithm: {}", msg),
            AppError::AccountRestricted(msg) => write!(f, "Account restricted: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl AppError {
    /// Protocol error kind carried in the response body.
    fn kind(&self) -> &'static str {
        match self {
            AppError::UnsupportedAlgorithm(_) => "UnsupportedAlgorithm",
            AppError::AccountRestricted(_) => "AccountRestricted",
            AppError::Unauthorized(_) => "AuthenticationRequired",
            AppError::BadRequest(_) => "InvalidRequest",
            AppError::DatabaseError(_) | AppError::Internal(_) => "InternalServerError",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::UnsupportedAlgorithm(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::AccountRestricted(_) => StatusCode::FORBIDDEN,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::DatabaseError(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Never leak internals; the log carries the detail.
        let message = match self {
            AppError::DatabaseError(_) | AppError::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.kind(),
            "message": message,
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::DatabaseError(e.to_string())
    }
}

impl From<feed_core::CoreError> for AppError {
    fn from(e: feed_core::CoreError) -> Self {
        AppError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_map_to_protocol_kinds() {
        assert_eq!(
            AppError::UnsupportedAlgorithm("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::AccountRestricted("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(AppError::AccountRestricted("x".into()).kind(), "AccountRestricted");
    }

    #[test]
    fn internal_detail_is_not_leaked() {
        let resp = AppError::DatabaseError("password=hunter2".into()).error_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
