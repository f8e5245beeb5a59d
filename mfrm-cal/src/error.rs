//! HTTP error type for mfrm-cal
//!
//! Every failure reaches the client as
//! `{"error": {"code": ..., "message": ...}}` so "not enough data",
//! "service call failed" and "invalid input" stay distinguishable.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::CalibrationError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Readiness checklist failed and was not overridden (409)
    #[error("Not ready: {0}")]
    NotReady(String),

    /// Conflict (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Estimation Service failure (502)
    #[error("Estimation service failure: {0}")]
    Dependency(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// mfrm-common error
    #[error("Common error: {0}")]
    Common(#[from] mfrm_common::Error),
}

impl From<CalibrationError> for ApiError {
    fn from(err: CalibrationError) -> Self {
        match err {
            CalibrationError::Validation(msg) => Self::BadRequest(msg),
            CalibrationError::NotReady(msg) => Self::NotReady(msg),
            CalibrationError::Dependency(msg) => Self::Dependency(msg),
            CalibrationError::NotFound(msg) => Self::NotFound(msg),
            CalibrationError::Conflict(msg) => Self::Conflict(msg),
            CalibrationError::InvariantViolation(msg) => {
                Self::Internal(format!("Invariant violated: {}", msg))
            }
            CalibrationError::Store(err) => Self::Common(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::NotReady(msg) => (StatusCode::CONFLICT, "NOT_READY", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Dependency(msg) => (StatusCode::BAD_GATEWAY, "ESTIMATION_FAILED", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(mfrm_common::Error::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
            }
            ApiError::Common(mfrm_common::Error::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg)
            }
            ApiError::Common(mfrm_common::Error::Conflict(msg)) => {
                (StatusCode::CONFLICT, "CONFLICT", msg)
            }
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
