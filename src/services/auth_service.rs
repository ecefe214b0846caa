use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntry, AuditRecorder};
use crate::auth::{credentials, AuthError, PrincipalClaims, Session, TokenIssuer};
use crate::clock::Clock;
use crate::database::models::Principal;
use crate::database::store::{Storage, Transaction};
use crate::error::ServiceError;
use crate::types::Access;

const PRINCIPAL: &str = "principal";

/// Registration, login and the session lifecycle on top of [`TokenIssuer`]
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn Storage>,
    issuer: TokenIssuer,
    audit: AuditRecorder,
    clock: Arc<dyn Clock>,
}

impl AuthService {
    pub fn new(store: Arc<dyn Storage>, issuer: TokenIssuer, audit: AuditRecorder, clock: Arc<dyn Clock>) -> Self {
        Self { store, issuer, audit, clock }
    }

    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    /// Create a principal and open its first session. Logins are unique per
    /// tenant partition.
    pub async fn register(
        &self,
        tenant_id: Option<Uuid>,
        login: &str,
        secret: &str,
        access: Access,
    ) -> Result<Session, ServiceError> {
        credentials::validate_login(login).map_err(ServiceError::invalid_payload)?;
        credentials::validate_secret(secret).map_err(ServiceError::invalid_payload)?;

        if self.store.principal_by_login(tenant_id, login).await?.is_some() {
            return Err(ServiceError::UniquenessViolation("login".to_string()));
        }

        let now = self.clock.now();
        let principal = Principal {
            id: Uuid::new_v4(),
            login: login.to_string(),
            access,
            tenant_id,
            fingerprint: credentials::fingerprint(secret)?,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.store.begin().await?;
        if let Err(e) = tx.insert_principal(&principal).await {
            rollback(tx).await;
            return Err(e.into());
        }
        let entry = self
            .audit_in(tx.as_mut(), principal.id, AuditAction::Register, principal.id, json!({ "access": access }))
            .await;
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                rollback(tx).await;
                return Err(e);
            }
        };
        tx.commit().await?;
        self.audit.committed(&entry);

        tracing::info!("Registered principal {} ({})", principal.login, principal.id);
        Ok(self.issuer.issue(&principal)?)
    }

    /// Unknown login and wrong secret fail identically
    pub async fn login(&self, tenant_id: Option<Uuid>, login: &str, secret: &str) -> Result<Session, ServiceError> {
        let found = self.store.principal_by_login(tenant_id, login).await?;
        let verified = match &found {
            Some(p) => credentials::verify(secret, &p.fingerprint)?,
            None => {
                credentials::verify_absent(secret);
                false
            }
        };
        let principal = match found {
            Some(p) if verified => p,
            _ => {
                tracing::warn!("Failed login for '{}'", login);
                return Err(AuthError::InvalidCredentials.into());
            }
        };
        if principal.access == Access::Deny {
            return Err(ServiceError::forbidden("principal is denied access"));
        }

        let session = self.issuer.issue(&principal)?;
        self.audit
            .record_now(principal.id, AuditAction::Login, PRINCIPAL, principal.id, json!({}))
            .await
            .map_err(ServiceError::audit)?;

        tracing::info!("Login for principal {}", principal.id);
        Ok(session)
    }

    pub fn issue(&self, principal: &Principal) -> Result<Session, ServiceError> {
        Ok(self.issuer.issue(principal)?)
    }

    pub fn verify(&self, token: &str) -> Result<PrincipalClaims, ServiceError> {
        self.issuer.verify(token).map_err(|e| {
            tracing::warn!("Token rejected: {}", e);
            ServiceError::from(e)
        })
    }

    /// Spend a refresh token and issue a new pair carrying the principal's
    /// current access level
    pub async fn rotate(&self, refresh_token: &str) -> Result<Session, ServiceError> {
        let claims = self.issuer.redeemable(refresh_token).await?;

        let principal = self
            .store
            .principal(claims.principal_id)
            .await?
            .ok_or(ServiceError::Unauthenticated(AuthError::Revoked))?;
        if principal.access == Access::Deny {
            return Err(ServiceError::forbidden("principal is denied access"));
        }

        let session = self.issuer.issue(&principal)?;
        self.spend(&claims, AuditAction::Rotate, json!({ "spent": claims.token_id })).await?;
        Ok(session)
    }

    /// Revoke a refresh token. Logging out twice is not an error.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), ServiceError> {
        let claims = self.issuer.verify_refresh(refresh_token)?;
        match self.spend(&claims, AuditAction::Logout, json!({ "revoked": claims.token_id })).await {
            Err(ServiceError::Unauthenticated(AuthError::Revoked)) => {
                tracing::debug!("Refresh token {} was already revoked", claims.token_id);
            }
            other => other?,
        }
        tracing::info!("Logout for principal {}", claims.principal_id);
        Ok(())
    }

    /// Forget revocations of refresh tokens that have expired. Runs after
    /// every spend; embedders may also call it on a timer.
    pub async fn purge_revocations(&self) -> Result<u64, ServiceError> {
        let purged = self.issuer.purge_revocations().await?;
        if purged > 0 {
            tracing::debug!("Purged {} expired revocations", purged);
        }
        Ok(purged)
    }

    /// Revoke the refresh token and append its audit entry in one transaction
    async fn spend(
        &self,
        claims: &PrincipalClaims,
        action: AuditAction,
        context: serde_json::Value,
    ) -> Result<(), ServiceError> {
        let mut tx = self.store.begin().await?;
        if let Err(e) = tx.revoke_token(claims.token_id, claims.expires_at).await {
            rollback(tx).await;
            return Err(e.into());
        }
        let entry = match self.audit_in(tx.as_mut(), claims.principal_id, action, claims.principal_id, context).await {
            Ok(entry) => entry,
            Err(e) => {
                rollback(tx).await;
                return Err(e);
            }
        };
        tx.commit().await?;
        self.audit.committed(&entry);

        if let Err(e) = self.purge_revocations().await {
            tracing::warn!("Revocation purge failed: {}", e);
        }
        Ok(())
    }

    /// Change another principal's access level. Only elevated principals of
    /// the same tenant may do this, and only root may hand out or take away root.
    pub async fn change_access(
        &self,
        actor: Option<&PrincipalClaims>,
        target_id: Uuid,
        access: Access,
    ) -> Result<Principal, ServiceError> {
        let actor = actor.ok_or(ServiceError::Unauthenticated(AuthError::Missing))?;
        if !actor.is_elevated() {
            return Err(ServiceError::forbidden("changing access requires full or root access"));
        }
        if access == Access::Root && actor.access != Access::Root {
            return Err(ServiceError::forbidden("only root may grant root access"));
        }

        let target = match self.store.principal(target_id).await? {
            Some(p) if p.partition() == actor.partition() => p,
            _ => return Err(ServiceError::NotFound),
        };
        if target.access == Access::Root && actor.access != Access::Root {
            return Err(ServiceError::forbidden("only root may change a root principal"));
        }

        let updated_at = self.clock.now().max(target.updated_at);
        let mut tx = self.store.begin().await?;
        if let Err(e) = tx.update_principal_access(target.id, access, updated_at).await {
            rollback(tx).await;
            return Err(e.into());
        }
        let context = json!({ "from": target.access, "to": access });
        let entry = match self.audit_in(tx.as_mut(), actor.principal_id, AuditAction::ChangeAccess, target.id, context).await {
            Ok(entry) => entry,
            Err(e) => {
                rollback(tx).await;
                return Err(e);
            }
        };
        tx.commit().await?;
        self.audit.committed(&entry);

        tracing::info!("Access of {} changed {} -> {} by {}", target.id, target.access, access, actor.principal_id);
        Ok(Principal { access, updated_at, ..target })
    }

    async fn audit_in(
        &self,
        tx: &mut dyn Transaction,
        actor: Uuid,
        action: AuditAction,
        target: Uuid,
        context: serde_json::Value,
    ) -> Result<AuditEntry, ServiceError> {
        self.audit
            .record(tx, actor, action, PRINCIPAL, target, context)
            .await
            .map_err(ServiceError::audit)
    }
}

async fn rollback(tx: Box<dyn Transaction>) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!("Rollback failed: {}", e);
    }
}
