use thiserror::Error;

use crate::database::store::StoreError;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing credentials")]
    Missing,

    #[error("Token expired")]
    Expired,

    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Token signature invalid")]
    SignatureInvalid,

    #[error("Token revoked")]
    Revoked,

    #[error("Invalid login or secret")]
    InvalidCredentials,

    #[error("JWT secret not configured")]
    InvalidSecret,

    #[error("JWT generation error: {0}")]
    TokenGeneration(String),

    #[error("Credential hashing error: {0}")]
    Hashing(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Failures the caller can fix by presenting different credentials
    pub fn is_unauthenticated(&self) -> bool {
        !matches!(self, AuthError::TokenGeneration(_) | AuthError::Hashing(_) | AuthError::InvalidSecret | AuthError::Store(_))
    }
}
