use uuid::Uuid;

use crate::auth::{AuthError, PrincipalClaims};
use crate::database::models::{Resource, ResourceKind, Scope};
use crate::error::ServiceError;
use crate::types::Action;

/// What the guard is asked about: a whole kind (list, create) or one stored instance
#[derive(Debug, Clone, Copy)]
pub enum ResourceRef<'a> {
    Collection(&'a ResourceKind),
    Instance {
        kind: &'a ResourceKind,
        tenant_id: Uuid,
        owner_id: Uuid,
        deleted: bool,
    },
}

impl<'a> ResourceRef<'a> {
    pub fn instance<T>(kind: &'a ResourceKind, resource: &Resource<T>) -> Self {
        ResourceRef::Instance {
            kind,
            tenant_id: resource.tenant_id,
            owner_id: resource.owner_id,
            deleted: resource.is_deleted(),
        }
    }
}

/// Tagged guard outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Unauthenticated,
    Forbidden(String),
    /// Instance exists but must not be revealed to this caller
    NotFound,
    AlreadyDeleted,
}

/// Single place where role, tenant and ownership rules are applied
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessGuard;

impl AccessGuard {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, principal: Option<&PrincipalClaims>, action: Action, target: ResourceRef<'_>) -> Decision {
        let Some(principal) = principal else {
            return Decision::Unauthenticated;
        };

        if principal.access < action.required_access() {
            let reason = format!("{} access cannot {:?} resources", principal.access, action);
            return Decision::Forbidden(reason.to_lowercase());
        }

        let (kind, tenant_id, owner_id, deleted) = match target {
            ResourceRef::Collection(_) => return Decision::Allow,
            ResourceRef::Instance { kind, tenant_id, owner_id, deleted } => (kind, tenant_id, owner_id, deleted),
        };

        // Tenant boundary holds for every access level, root included
        if tenant_id != principal.partition() {
            return Decision::NotFound;
        }

        let elevated = principal.is_elevated();
        if kind.scope == Scope::Owner && !elevated && owner_id != principal.principal_id {
            return Decision::Forbidden("resource belongs to another principal".to_string());
        }

        if deleted {
            return match action {
                Action::Delete => Decision::AlreadyDeleted,
                Action::Restore => Decision::Allow,
                Action::Read | Action::List if elevated => Decision::Allow,
                _ => Decision::NotFound,
            };
        }
        Decision::Allow
    }

    pub fn authorize<'p>(
        &self,
        principal: Option<&'p PrincipalClaims>,
        action: Action,
        target: ResourceRef<'_>,
    ) -> Result<&'p PrincipalClaims, ServiceError> {
        match (self.evaluate(principal, action, target), principal) {
            (Decision::Allow, Some(principal)) => Ok(principal),
            (Decision::Allow, None) | (Decision::Unauthenticated, _) => {
                Err(ServiceError::Unauthenticated(AuthError::Missing))
            }
            (Decision::Forbidden(reason), _) => {
                tracing::warn!(
                    principal = ?principal.map(|p| p.principal_id),
                    ?action,
                    "Access denied: {}",
                    reason
                );
                Err(ServiceError::Forbidden(reason))
            }
            (Decision::NotFound, _) => Err(ServiceError::NotFound),
            (Decision::AlreadyDeleted, _) => Err(ServiceError::AlreadyDeleted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenKind;
    use crate::types::Access;
    use chrono::Utc;

    fn claims(access: Access, tenant_id: Uuid) -> PrincipalClaims {
        let now = Utc::now();
        PrincipalClaims {
            principal_id: Uuid::new_v4(),
            login: "p".to_string(),
            access,
            tenant_id: Some(tenant_id),
            token_id: Uuid::new_v4(),
            kind: TokenKind::Access,
            issued_at: now,
            expires_at: now,
        }
    }

    fn instance(kind: &ResourceKind, tenant_id: Uuid, owner_id: Uuid, deleted: bool) -> ResourceRef<'_> {
        ResourceRef::Instance { kind, tenant_id, owner_id, deleted }
    }

    #[test]
    fn missing_principal_is_unauthenticated_not_forbidden() {
        let kind = ResourceKind::new("ticket");
        let guard = AccessGuard::new();
        assert_eq!(guard.evaluate(None, Action::List, ResourceRef::Collection(&kind)), Decision::Unauthenticated);
        assert!(matches!(
            guard.authorize(None, Action::Read, ResourceRef::Collection(&kind)),
            Err(ServiceError::Unauthenticated(_))
        ));
    }

    #[test]
    fn access_levels_gate_actions() {
        let kind = ResourceKind::new("ticket");
        let guard = AccessGuard::new();
        let tenant = Uuid::new_v4();
        let coll = ResourceRef::Collection(&kind);

        assert!(matches!(guard.evaluate(Some(&claims(Access::Deny, tenant)), Action::List, coll), Decision::Forbidden(_)));
        assert_eq!(guard.evaluate(Some(&claims(Access::Read, tenant)), Action::List, coll), Decision::Allow);
        assert!(matches!(guard.evaluate(Some(&claims(Access::Read, tenant)), Action::Create, coll), Decision::Forbidden(_)));
        assert_eq!(guard.evaluate(Some(&claims(Access::Edit, tenant)), Action::Delete, coll), Decision::Allow);
        assert!(matches!(guard.evaluate(Some(&claims(Access::Edit, tenant)), Action::Restore, coll), Decision::Forbidden(_)));
        assert_eq!(guard.evaluate(Some(&claims(Access::Full, tenant)), Action::Restore, coll), Decision::Allow);
    }

    #[test]
    fn tenant_boundary_holds_even_for_root() {
        let kind = ResourceKind::new("ticket");
        let guard = AccessGuard::new();
        let root = claims(Access::Root, Uuid::new_v4());
        let foreign = instance(&kind, Uuid::new_v4(), Uuid::new_v4(), false);
        assert_eq!(guard.evaluate(Some(&root), Action::Read, foreign), Decision::NotFound);
    }

    #[test]
    fn owner_scope_is_bypassed_only_by_elevated() {
        let kind = ResourceKind::new("note").owner_scoped();
        let guard = AccessGuard::new();
        let tenant = Uuid::new_v4();
        let editor = claims(Access::Edit, tenant);
        let other_owner = instance(&kind, tenant, Uuid::new_v4(), false);
        let own = instance(&kind, tenant, editor.principal_id, false);

        assert!(matches!(guard.evaluate(Some(&editor), Action::Update, other_owner), Decision::Forbidden(_)));
        assert_eq!(guard.evaluate(Some(&editor), Action::Update, own), Decision::Allow);
        assert_eq!(guard.evaluate(Some(&claims(Access::Full, tenant)), Action::Update, other_owner), Decision::Allow);
    }

    #[test]
    fn deleted_instances() {
        let kind = ResourceKind::new("ticket");
        let guard = AccessGuard::new();
        let tenant = Uuid::new_v4();
        let gone = instance(&kind, tenant, Uuid::new_v4(), true);
        let editor = claims(Access::Edit, tenant);
        let admin = claims(Access::Full, tenant);

        assert_eq!(guard.evaluate(Some(&editor), Action::Read, gone), Decision::NotFound);
        assert_eq!(guard.evaluate(Some(&editor), Action::Delete, gone), Decision::AlreadyDeleted);
        assert_eq!(guard.evaluate(Some(&admin), Action::Read, gone), Decision::Allow);
        assert_eq!(guard.evaluate(Some(&admin), Action::Update, gone), Decision::NotFound);
        assert_eq!(guard.evaluate(Some(&admin), Action::Restore, gone), Decision::Allow);
    }
}
