use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::sync::Arc;
use uuid::Uuid;

use super::claims::{Claims, Identity, PrincipalClaims, Session, TokenKind};
use super::error::AuthError;
use super::revocation::RevocationList;
use crate::clock::Clock;
use crate::config::SecurityConfig;
use crate::database::models::Principal;

/// HS256 signing and verification keys derived from one shared secret
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenKeys {
    pub fn from_secret(secret: &str) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::InvalidSecret);
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        })
    }
}

/// Mints, verifies and rotates session tokens.
///
/// Expiry is judged against the injected [`Clock`] rather than the wall
/// clock. Refresh tokens are single use: a spent `jti` is listed in the
/// [`RevocationList`].
#[derive(Clone)]
pub struct TokenIssuer {
    keys: TokenKeys,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    clock: Arc<dyn Clock>,
    revocations: Arc<dyn RevocationList>,
}

impl TokenIssuer {
    pub fn new(
        security: &SecurityConfig,
        clock: Arc<dyn Clock>,
        revocations: Arc<dyn RevocationList>,
    ) -> Result<Self, AuthError> {
        Ok(Self {
            keys: TokenKeys::from_secret(&security.jwt_secret)?,
            issuer: security.jwt_issuer.clone(),
            access_ttl: Duration::minutes(security.access_token_ttl_minutes),
            refresh_ttl: Duration::days(security.refresh_token_ttl_days),
            clock,
            revocations,
        })
    }

    pub fn issue(&self, principal: &Principal) -> Result<Session, AuthError> {
        self.mint(&Identity::from(principal))
    }

    /// Verify an access token
    pub fn verify(&self, token: &str) -> Result<PrincipalClaims, AuthError> {
        self.decode_kind(token, TokenKind::Access)
    }

    /// Verify a refresh token without spending it
    pub fn verify_refresh(&self, token: &str) -> Result<PrincipalClaims, AuthError> {
        self.decode_kind(token, TokenKind::Refresh)
    }

    /// Verify a refresh token and check it has not been spent. Spending it
    /// is the caller's job, inside the transaction that records the event.
    pub async fn redeemable(&self, refresh_token: &str) -> Result<PrincipalClaims, AuthError> {
        let claims = self.verify_refresh(refresh_token)?;
        if self.revocations.is_revoked(claims.token_id).await? {
            return Err(AuthError::Revoked);
        }
        Ok(claims)
    }

    /// Drop revocation entries for refresh tokens that have expired anyway
    pub async fn purge_revocations(&self) -> Result<u64, AuthError> {
        Ok(self.revocations.purge_expired(self.clock.now()).await?)
    }

    pub(crate) fn mint(&self, identity: &Identity) -> Result<Session, AuthError> {
        let now = self.clock.now();
        let (access_token, access_expires_at) = self.sign(identity, TokenKind::Access, now, self.access_ttl)?;
        let (refresh_token, refresh_expires_at) = self.sign(identity, TokenKind::Refresh, now, self.refresh_ttl)?;

        Ok(Session {
            principal_id: identity.principal_id,
            access_token,
            refresh_token,
            issued_at: now,
            access_expires_at,
            refresh_expires_at,
        })
    }

    fn sign(
        &self,
        identity: &Identity,
        kind: TokenKind,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<(String, DateTime<Utc>), AuthError> {
        let exp = (now + ttl).timestamp();
        let expires_at = DateTime::from_timestamp(exp, 0)
            .ok_or_else(|| AuthError::TokenGeneration(format!("expiry out of range: {}", exp)))?;

        let claims = Claims {
            sub: identity.principal_id,
            login: identity.login.clone(),
            access: identity.access,
            tenant: identity.tenant_id,
            jti: Uuid::new_v4(),
            kind,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.keys.encoding)
            .map_err(|e| AuthError::TokenGeneration(e.to_string()))?;
        Ok((token, expires_at))
    }

    fn decode_kind(&self, token: &str, expected: TokenKind) -> Result<PrincipalClaims, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::Missing);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let data = decode::<Claims>(token, &self.keys.decoding, &validation).map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature => AuthError::SignatureInvalid,
            ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::Malformed(e.to_string()),
        })?;
        let claims = data.claims;

        if claims.kind != expected {
            return Err(AuthError::Malformed(format!("expected {:?} token", expected).to_lowercase()));
        }

        let expires_at = DateTime::from_timestamp(claims.exp, 0)
            .ok_or_else(|| AuthError::Malformed("exp out of range".to_string()))?;
        let issued_at = DateTime::from_timestamp(claims.iat, 0)
            .ok_or_else(|| AuthError::Malformed("iat out of range".to_string()))?;
        if self.clock.now() >= expires_at {
            return Err(AuthError::Expired);
        }

        Ok(PrincipalClaims {
            principal_id: claims.sub,
            login: claims.login,
            access: claims.access,
            tenant_id: claims.tenant,
            token_id: claims.jti,
            kind: claims.kind,
            issued_at,
            expires_at,
        })
    }
}
