// Service error taxonomy
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use thiserror::Error;

use crate::auth::AuthError;
use crate::database::record::RecordError;
use crate::database::store::StoreError;
use crate::filter::FilterError;

/// Every failure a caller of the services can observe. Storage-specific
/// shapes never escape: they are mapped onto these variants.
#[derive(Error, Debug)]
pub enum ServiceError {
    // 401
    #[error("Unauthenticated: {0}")]
    Unauthenticated(AuthError),

    // 403
    #[error("Forbidden: {0}")]
    Forbidden(String),

    // 404
    #[error("Not found")]
    NotFound,

    // 409
    #[error("Uniqueness violation: {0}")]
    UniquenessViolation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Already deleted")]
    AlreadyDeleted,

    // 400
    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Invalid operator: {0}")]
    InvalidOperator(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    // 423
    #[error("Locked: {0}")]
    Locked(String),

    // 500
    #[error("Fatal: {0}")]
    Fatal(String),
}

impl ServiceError {
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Unauthenticated(_) => 401,
            ServiceError::Forbidden(_) => 403,
            ServiceError::NotFound => 404,
            ServiceError::UniquenessViolation(_) | ServiceError::Conflict(_) | ServiceError::AlreadyDeleted => 409,
            ServiceError::InvalidField(_) | ServiceError::InvalidOperator(_) | ServiceError::InvalidPayload(_) => 400,
            ServiceError::Locked(_) => 423,
            ServiceError::Fatal(_) => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::Unauthenticated(_) => "UNAUTHENTICATED",
            ServiceError::Forbidden(_) => "FORBIDDEN",
            ServiceError::NotFound => "NOT_FOUND",
            ServiceError::UniquenessViolation(_) => "UNIQUENESS_VIOLATION",
            ServiceError::Conflict(_) => "CONFLICT",
            ServiceError::AlreadyDeleted => "ALREADY_DELETED",
            ServiceError::InvalidField(_) => "INVALID_FIELD",
            ServiceError::InvalidOperator(_) => "INVALID_OPERATOR",
            ServiceError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ServiceError::Locked(_) => "LOCKED",
            ServiceError::Fatal(_) => "FATAL",
        }
    }

    /// Client-safe message. Fatal details stay in the logs.
    pub fn message(&self) -> String {
        match self {
            ServiceError::Fatal(_) => "An error occurred while processing your request".to_string(),
            other => other.to_string(),
        }
    }

    /// Worth retrying after re-reading current state
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::UniquenessViolation(_) | ServiceError::Conflict(_))
    }

    pub fn to_json(&self) -> Value {
        json!({
            "error": true,
            "message": self.message(),
            "code": self.error_code(),
            "retryable": self.is_retryable()
        })
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ServiceError::Forbidden(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ServiceError::Conflict(message.into())
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        ServiceError::InvalidPayload(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!("Fatal: {}", message);
        ServiceError::Fatal(message)
    }

    /// A failed audit append aborts the enclosing mutation
    pub fn audit(err: StoreError) -> Self {
        Self::fatal(format!("audit append failed: {}", err))
    }

    /// Unique violations during update mean another active record holds the key
    pub fn from_update(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(key) => ServiceError::Conflict(format!("'{}' is taken by another record", key)),
            other => other.into(),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(key) => ServiceError::UniquenessViolation(key),
            StoreError::VersionConflict => ServiceError::conflict("record was modified concurrently; re-read and retry"),
            StoreError::NotFound => ServiceError::NotFound,
            StoreError::AlreadyRevoked => ServiceError::Unauthenticated(AuthError::Revoked),
            other => ServiceError::fatal(format!("storage failure: {}", other)),
        }
    }
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Store(store) => store.into(),
            other if other.is_unauthenticated() => ServiceError::Unauthenticated(other),
            other => ServiceError::fatal(other.to_string()),
        }
    }
}

impl From<FilterError> for ServiceError {
    fn from(err: FilterError) -> Self {
        match err {
            FilterError::InvalidField(field) => ServiceError::InvalidField(field),
            other => ServiceError::InvalidOperator(other.to_string()),
        }
    }
}

impl From<RecordError> for ServiceError {
    fn from(err: RecordError) -> Self {
        ServiceError::InvalidPayload(err.to_string())
    }
}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ServiceError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}
