use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::models::Principal;
use crate::types::Access;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Wire claims carried inside both access and refresh tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub login: String,
    pub access: Access,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<Uuid>,
    pub jti: Uuid,
    pub kind: TokenKind,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// Who a token speaks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub principal_id: Uuid,
    pub login: String,
    pub access: Access,
    pub tenant_id: Option<Uuid>,
}

impl From<&Principal> for Identity {
    fn from(principal: &Principal) -> Self {
        Self {
            principal_id: principal.id,
            login: principal.login.clone(),
            access: principal.access,
            tenant_id: principal.tenant_id,
        }
    }
}

/// Authenticated principal context produced by token verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrincipalClaims {
    pub principal_id: Uuid,
    pub login: String,
    pub access: Access,
    pub tenant_id: Option<Uuid>,
    pub token_id: Uuid,
    pub kind: TokenKind,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PrincipalClaims {
    /// Tenant partition the principal lives in
    pub fn partition(&self) -> Uuid {
        self.tenant_id.unwrap_or(self.principal_id)
    }

    pub fn is_elevated(&self) -> bool {
        self.access.is_elevated()
    }

    pub fn identity(&self) -> Identity {
        Identity {
            principal_id: self.principal_id,
            login: self.login.clone(),
            access: self.access,
            tenant_id: self.tenant_id,
        }
    }
}

/// Token pair handed to a client after register, login or rotate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub principal_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
    pub issued_at: DateTime<Utc>,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}
