//! Unified error types for Practicum Admin
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the admin core and its HTTP surface
#[derive(Error, Debug)]
pub enum AdminError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Referenced entity is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Permission denied, or the presented key is invalid/exhausted
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Missing or bad credentials
    #[error("Authentication failed: {0}")]
    Unauthenticated(String),

    /// Malformed input caught before any persistence call
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unique violation or a lost compare-and-set
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A role resolved to zero permissions
    #[error("Ambiguous result: {0}")]
    AmbiguousResult(String),

    /// The request deadline elapsed before the worker produced a result
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// The request was cancelled before the worker produced a result
    #[error("Request cancelled")]
    Cancelled,

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AdminError {
    /// True for failures the caller cannot act on (store, hashing, join errors)
    pub fn is_internal(&self) -> bool {
        matches!(self, AdminError::Database(_) | AdminError::Internal(_))
    }

    /// Stable machine-readable code used in HTTP error bodies
    pub fn code(&self) -> &'static str {
        match self {
            AdminError::NotFound(_) => "NotFound",
            AdminError::Forbidden(_) => "Forbidden",
            AdminError::Unauthenticated(_) => "AuthenticationRequired",
            AdminError::InvalidArgument(_) => "InvalidRequest",
            AdminError::Conflict(_) => "Conflict",
            AdminError::AmbiguousResult(_) => "AmbiguousResult",
            AdminError::DeadlineExceeded => "DeadlineExceeded",
            AdminError::Cancelled => "Cancelled",
            AdminError::Database(_) | AdminError::Internal(_) => "InternalServerError",
        }
    }

    /// Collapse any error into `Internal`, keeping its message.
    ///
    /// Used by the registration workflow, where every persistence step reports
    /// the same failure kind to the caller.
    pub fn into_internal(self) -> Self {
        match self {
            AdminError::Internal(_) => self,
            other => AdminError::Internal(other.to_string()),
        }
    }
}

/// JSON error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert AdminError to HTTP response
impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match self {
            AdminError::NotFound(_) => StatusCode::NOT_FOUND,
            AdminError::Forbidden(_) => StatusCode::FORBIDDEN,
            AdminError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AdminError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            AdminError::Conflict(_) => StatusCode::CONFLICT,
            AdminError::AmbiguousResult(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AdminError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            AdminError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            AdminError::Database(_) | AdminError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = if self.is_internal() {
            tracing::error!("Request failed: {}", self);
            "Internal server error".to_string() // Don't leak details
        } else {
            self.to_string()
        };

        let body = Json(ErrorResponse {
            error: self.code().to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for admin operations
pub type AdminResult<T> = Result<T, AdminError>;
