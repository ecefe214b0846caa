use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};

use once_cell::sync::Lazy;

use super::error::AuthError;

const LOGIN_MIN: usize = 3;
const LOGIN_MAX: usize = 50;

/// Hash a secret into an argon2 PHC string
pub fn fingerprint(secret: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(secret.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

/// Verify a secret against a stored fingerprint
pub fn verify(secret: &str, fingerprint: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(fingerprint).map_err(|e| AuthError::Hashing(e.to_string()))?;

    Ok(Argon2::default().verify_password(secret.as_bytes(), &parsed).is_ok())
}

static ABSENT_FINGERPRINT: Lazy<Option<String>> = Lazy::new(|| fingerprint("no-such-principal").ok());

/// Spend the same argon2 work as [`verify`] for a login that matched nobody
pub fn verify_absent(secret: &str) {
    if let Some(fp) = ABSENT_FINGERPRINT.as_deref() {
        let _ = verify(secret, fp);
    }
}

/// Logins are 3 to 50 characters of ASCII letters, digits, `_` or `-`
pub fn validate_login(login: &str) -> Result<(), String> {
    if login.len() < LOGIN_MIN || login.len() > LOGIN_MAX {
        return Err(format!("login must be {} to {} characters", LOGIN_MIN, LOGIN_MAX));
    }
    if !login.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err("login may only contain letters, digits, '_' and '-'".to_string());
    }
    Ok(())
}

pub fn validate_secret(secret: &str) -> Result<(), String> {
    if secret.is_empty() {
        return Err("secret must not be empty".to_string());
    }
    Ok(())
}
