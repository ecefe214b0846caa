use axum::http::{header::AUTHORIZATION, HeaderMap};

use crate::auth::{AuthError, PrincipalClaims};
use crate::services::AuthService;

/// Extract the bearer token from the Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let auth_header = headers.get(AUTHORIZATION).ok_or(AuthError::Missing)?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| AuthError::Malformed("Invalid Authorization header format".to_string()))?;

    match auth_str.strip_prefix("Bearer ") {
        Some(token) if token.trim().is_empty() => Err(AuthError::Missing),
        Some(token) => Ok(token.trim()),
        None => Err(AuthError::Malformed("Authorization header must use Bearer token format".to_string())),
    }
}

/// Resolve the caller of a request. A missing header yields `None` so the
/// guard reports Unauthenticated; a present but bad token is an error.
pub fn authenticate(auth: &AuthService, headers: &HeaderMap) -> Result<Option<PrincipalClaims>, AuthError> {
    match extract_bearer_token(headers) {
        Ok(token) => auth.issuer().verify(token).map(Some),
        Err(AuthError::Missing) => Ok(None),
        Err(e) => Err(e),
    }
}
