//! Error taxonomy for the STAG API.
//!
//! Every error that can surface to a client carries a stable code and an
//! HTTP status; the transport layers (REST handlers, WebSocket frames)
//! render them without further classification.

use thiserror::Error;

/// Result type alias for STAG operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Behavioral error kinds surfaced by the service.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Malformed request body or parameters.
    #[error("{0}")]
    BadRequest(String),

    /// A semantic validation failure (missing field, bad encoding, delta
    /// without a base).
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested entity does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Reserved for write conflicts.
    #[error("{0}")]
    Conflict(String),

    /// Store I/O, query execution, or row decode failure.
    #[error("database error: {0}")]
    Database(String),

    /// Reserved for throttling.
    #[error("{0}")]
    RateLimit(String),

    /// Anything uncategorized.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Stable machine-readable code for the `{error, code}` JSON body.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Database(_) => "DATABASE_ERROR",
            ApiError::RateLimit(_) => "RATE_LIMIT_EXCEEDED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Prefix the message with context while preserving the kind, so a
    /// wrapped validation failure still surfaces as a 400.
    pub fn with_context(self, context: &str) -> ApiError {
        match self {
            ApiError::BadRequest(m) => ApiError::BadRequest(format!("{context}: {m}")),
            ApiError::Validation(m) => ApiError::Validation(format!("{context}: {m}")),
            ApiError::NotFound(m) => ApiError::NotFound(format!("{context}: {m}")),
            ApiError::Conflict(m) => ApiError::Conflict(format!("{context}: {m}")),
            ApiError::Database(m) => ApiError::Database(format!("{context}: {m}")),
            ApiError::RateLimit(m) => ApiError::RateLimit(format!("{context}: {m}")),
            ApiError::Internal(m) => ApiError::Internal(format!("{context}: {m}")),
        }
    }

    /// Bound HTTP status code.
    pub fn status(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) | ApiError::Validation(_) => 400,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::RateLimit(_) => 429,
            ApiError::Database(_) | ApiError::Internal(_) => 500,
        }
    }
}
