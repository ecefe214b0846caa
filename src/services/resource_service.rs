use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditRecorder};
use crate::auth::PrincipalClaims;
use crate::clock::Clock;
use crate::database::models::{Resource, ResourceKind, Scope};
use crate::database::repository::{OwnerRef, RecordScope, Repository};
use crate::database::store::Storage;
use crate::error::ServiceError;
use crate::filter::{Pagination, QueryCompiler, QuerySpec};
use crate::guard::{AccessGuard, ResourceRef};
use crate::types::Action;

/// One page of a list call
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<Resource<T>>,
    pub pagination: Pagination,
}

/// CRUD over one resource kind with payloads typed as `T`.
///
/// Every operation runs the guard before touching storage, then again
/// against the stored instance once it has been loaded.
pub struct ResourceService<T> {
    repo: Repository,
    compiler: QueryCompiler,
    guard: AccessGuard,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Clone for ResourceService<T> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
            compiler: self.compiler.clone(),
            guard: self.guard,
            _payload: PhantomData,
        }
    }
}

impl<T> ResourceService<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(
        kind: ResourceKind,
        store: Arc<dyn Storage>,
        audit: AuditRecorder,
        clock: Arc<dyn Clock>,
        compiler: QueryCompiler,
    ) -> Self {
        Self {
            repo: Repository::new(kind, store, audit, clock),
            compiler,
            guard: AccessGuard::new(),
            _payload: PhantomData,
        }
    }

    pub fn kind(&self) -> &ResourceKind {
        self.repo.kind()
    }

    pub async fn list(&self, principal: Option<&PrincipalClaims>, spec: &QuerySpec) -> Result<Page<T>, ServiceError> {
        let kind = self.repo.kind();
        let principal = self.guard.authorize(principal, Action::List, ResourceRef::Collection(kind))?;

        let plan = self.compiler.compile(spec, &kind.filter_fields, &kind.sort_fields)?;
        let owner = match kind.scope {
            Scope::Owner if !principal.is_elevated() => Some(principal.principal_id),
            _ => None,
        };
        let plan = plan.restrict(principal.partition(), owner, principal.is_elevated());

        let (rows, records) = self.repo.list(&plan).await?;
        let data = rows.into_iter().map(|r| self.typed(r)).collect::<Result<Vec<_>, _>>()?;
        Ok(Page { data, pagination: plan.pagination(records) })
    }

    pub async fn get(&self, principal: Option<&PrincipalClaims>, id: Uuid) -> Result<Resource<T>, ServiceError> {
        let (_, current) = self.load(principal, Action::Read, id).await?;
        self.typed(current)
    }

    pub async fn create(&self, principal: Option<&PrincipalClaims>, payload: &T) -> Result<Resource<T>, ServiceError> {
        let principal = self.guard.authorize(principal, Action::Create, ResourceRef::Collection(self.repo.kind()))?;
        let payload = serde_json::to_value(payload).map_err(|e| ServiceError::invalid_payload(e.to_string()))?;

        let owner = OwnerRef { tenant_id: principal.partition(), owner_id: principal.principal_id };
        let created = self.repo.create(payload, owner, principal.principal_id).await?;
        self.typed(created)
    }

    /// Partial update: keys present in `partial` overwrite, `null` clears.
    /// The merged payload must still be a valid `T`.
    pub async fn update(
        &self,
        principal: Option<&PrincipalClaims>,
        id: Uuid,
        partial: Value,
    ) -> Result<Resource<T>, ServiceError> {
        let (actor, current) = self.load(principal, Action::Update, id).await?;

        let record = self.repo.merge(&current, partial)?;
        serde_json::from_value::<T>(record.to_json()).map_err(|e| ServiceError::invalid_payload(e.to_string()))?;

        let updated = self.repo.apply_update(&current, record, actor).await?;
        self.typed(updated)
    }

    pub async fn delete(&self, principal: Option<&PrincipalClaims>, id: Uuid) -> Result<(), ServiceError> {
        let (actor, current) = self.load(principal, Action::Delete, id).await?;
        self.repo.apply_delete(&current, actor).await
    }

    pub async fn restore(&self, principal: Option<&PrincipalClaims>, id: Uuid) -> Result<Resource<T>, ServiceError> {
        let (actor, current) = self.load(principal, Action::Restore, id).await?;
        let restored = self.repo.apply_restore(&current, actor).await?;
        self.typed(restored)
    }

    /// Audit trail of one resource, for anyone allowed to read it
    pub async fn history(&self, principal: Option<&PrincipalClaims>, id: Uuid) -> Result<Vec<AuditEntry>, ServiceError> {
        let (_, current) = self.load(principal, Action::Read, id).await?;
        Ok(self.repo.audit().history(&current.kind, current.id).await?)
    }

    /// Role check, point lookup inside the caller's partition, then the
    /// instance check. Returns the acting principal id with the stored row.
    async fn load(
        &self,
        principal: Option<&PrincipalClaims>,
        action: Action,
        id: Uuid,
    ) -> Result<(Uuid, Resource), ServiceError> {
        let kind = self.repo.kind();
        let principal = self.guard.authorize(principal, action, ResourceRef::Collection(kind))?;

        let current = self.repo.get(id, &RecordScope::with_deleted(principal.partition())).await?;
        self.guard.authorize(Some(principal), action, ResourceRef::instance(kind, &current))?;
        Ok((principal.principal_id, current))
    }

    fn typed(&self, resource: Resource) -> Result<Resource<T>, ServiceError> {
        let id = resource.id;
        resource
            .typed()
            .map_err(|e| ServiceError::fatal(format!("stored {} {} does not match its payload type: {}", self.repo.kind().name, id, e)))
    }
}
