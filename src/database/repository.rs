use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditRecorder};
use crate::clock::Clock;
use crate::database::models::{DeletePolicy, KeyClaim, Resource, ResourceKind};
use crate::database::record::Record;
use crate::database::store::{Storage, StoreError, Transaction};
use crate::error::ServiceError;
use crate::filter::QueryPlan;

/// Where a new resource lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerRef {
    pub tenant_id: Uuid,
    pub owner_id: Uuid,
}

/// Visibility window for point lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordScope {
    pub tenant_id: Uuid,
    pub include_deleted: bool,
}

impl RecordScope {
    pub fn active(tenant_id: Uuid) -> Self {
        Self { tenant_id, include_deleted: false }
    }

    pub fn with_deleted(tenant_id: Uuid) -> Self {
        Self { tenant_id, include_deleted: true }
    }
}

enum Write<'a> {
    Insert(&'a Resource, Vec<KeyClaim>),
    Update(&'a Resource, DateTime<Utc>, Vec<KeyClaim>),
    Remove(&'a Resource),
}

/// Storage access for one resource kind: tenant scoping, natural keys,
/// the soft-delete lifecycle, and an audit entry committed with every write.
#[derive(Clone)]
pub struct Repository {
    kind: Arc<ResourceKind>,
    store: Arc<dyn Storage>,
    audit: AuditRecorder,
    clock: Arc<dyn Clock>,
}

impl Repository {
    pub fn new(kind: ResourceKind, store: Arc<dyn Storage>, audit: AuditRecorder, clock: Arc<dyn Clock>) -> Self {
        Self { kind: Arc::new(kind), store, audit, clock }
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn audit(&self) -> &AuditRecorder {
        &self.audit
    }

    pub async fn create(&self, payload: Value, owner: OwnerRef, actor: Uuid) -> Result<Resource, ServiceError> {
        let record = Record::from_api_input(payload)?;
        let fields = record.changed_fields();
        let payload = record.into_json();

        let claims = self.kind.key_claims(&payload);
        self.check_keys(owner.tenant_id, &claims, None).await?;

        let now = self.now();
        let resource = Resource {
            id: Uuid::new_v4(),
            kind: self.kind.name.clone(),
            tenant_id: owner.tenant_id,
            owner_id: owner.owner_id,
            payload,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        self.commit_write(Write::Insert(&resource, claims), actor, AuditAction::Create, json!({ "fields": fields }), ServiceError::from)
            .await?;
        tracing::info!("Created {} {}", self.kind.name, resource.id);
        Ok(resource)
    }

    /// NotFound covers absent, foreign-tenant and (unless the scope asks for
    /// them) soft-deleted resources alike
    pub async fn get(&self, id: Uuid, scope: &RecordScope) -> Result<Resource, ServiceError> {
        match self.store.fetch(&self.kind.name, id).await? {
            Some(r) if r.tenant_id == scope.tenant_id && (scope.include_deleted || r.is_active()) => Ok(r),
            _ => Err(ServiceError::NotFound),
        }
    }

    pub async fn list(&self, plan: &QueryPlan) -> Result<(Vec<Resource>, u64), ServiceError> {
        Ok(self.store.scan(&self.kind.name, plan).await?)
    }

    pub async fn update(&self, id: Uuid, partial: Value, scope: &RecordScope, actor: Uuid) -> Result<Resource, ServiceError> {
        let current = self.get(id, &RecordScope::active(scope.tenant_id)).await?;
        let record = self.merge(&current, partial)?;
        self.apply_update(&current, record, actor).await
    }

    pub async fn soft_delete(&self, id: Uuid, scope: &RecordScope, actor: Uuid) -> Result<(), ServiceError> {
        let current = self.get(id, &RecordScope::with_deleted(scope.tenant_id)).await?;
        self.apply_delete(&current, actor).await
    }

    pub async fn restore(&self, id: Uuid, scope: &RecordScope, actor: Uuid) -> Result<Resource, ServiceError> {
        let current = self.get(id, &RecordScope::with_deleted(scope.tenant_id)).await?;
        self.apply_restore(&current, actor).await
    }

    /// Overlay a partial payload on the stored one
    pub fn merge(&self, current: &Resource, partial: Value) -> Result<Record, ServiceError> {
        let mut record = Record::from_stored(&current.payload);
        record.apply_partial(partial)?;
        Ok(record)
    }

    /// Write a merged payload, provided nobody changed the row since `current` was read
    pub async fn apply_update(&self, current: &Resource, record: Record, actor: Uuid) -> Result<Resource, ServiceError> {
        if current.is_deleted() {
            return Err(ServiceError::NotFound);
        }
        let fields = record.changed_fields();
        let payload = record.into_json();

        let claims = self.kind.key_claims(&payload);
        self.check_keys(current.tenant_id, &claims, Some(current.id))
            .await
            .map_err(|e| match e {
                ServiceError::UniquenessViolation(key) => {
                    ServiceError::conflict(format!("'{}' is taken by another record", key))
                }
                other => other,
            })?;

        let updated = Resource {
            payload,
            updated_at: self.next_timestamp(current.updated_at),
            ..current.clone()
        };

        self.commit_write(
            Write::Update(&updated, current.updated_at, claims),
            actor,
            AuditAction::Update,
            json!({ "fields": fields }),
            ServiceError::from_update,
        )
        .await?;
        tracing::info!("Updated {} {}", self.kind.name, updated.id);
        Ok(updated)
    }

    pub async fn apply_delete(&self, current: &Resource, actor: Uuid) -> Result<(), ServiceError> {
        if current.is_deleted() {
            return Err(ServiceError::AlreadyDeleted);
        }
        if self.kind.is_locked(&current.payload) {
            return Err(ServiceError::Locked(format!("{} {} is in a state that forbids deletion", self.kind.name, current.id)));
        }

        match self.kind.delete_policy {
            DeletePolicy::Soft => {
                let at = self.next_timestamp(current.updated_at);
                let deleted = Resource { updated_at: at, deleted_at: Some(at), ..current.clone() };
                // Releasing the claims frees the natural keys for new records
                self.commit_write(
                    Write::Update(&deleted, current.updated_at, Vec::new()),
                    actor,
                    AuditAction::Delete,
                    json!({ "policy": "soft" }),
                    ServiceError::from,
                )
                .await?;
            }
            DeletePolicy::Hard => {
                self.commit_write(Write::Remove(current), actor, AuditAction::Delete, json!({ "policy": "hard" }), ServiceError::from)
                    .await?;
            }
        }
        tracing::info!("Deleted {} {}", self.kind.name, current.id);
        Ok(())
    }

    pub async fn apply_restore(&self, current: &Resource, actor: Uuid) -> Result<Resource, ServiceError> {
        if !self.kind.restorable {
            return Err(ServiceError::forbidden(format!("{} resources cannot be restored", self.kind.name)));
        }
        if current.is_active() {
            return Err(ServiceError::conflict("resource is not deleted"));
        }

        let claims = self.kind.key_claims(&current.payload);
        self.check_keys(current.tenant_id, &claims, Some(current.id)).await?;

        let restored = Resource {
            updated_at: self.next_timestamp(current.updated_at),
            deleted_at: None,
            ..current.clone()
        };
        self.commit_write(
            Write::Update(&restored, current.updated_at, claims),
            actor,
            AuditAction::Restore,
            json!({}),
            ServiceError::from,
        )
        .await?;
        tracing::info!("Restored {} {}", self.kind.name, restored.id);
        Ok(restored)
    }

    /// Pre-check natural keys. The storage constraint stays authoritative.
    async fn check_keys(&self, tenant_id: Uuid, claims: &[KeyClaim], except: Option<Uuid>) -> Result<(), ServiceError> {
        for claim in claims {
            if let Some(holder) = self.store.key_holder(&self.kind.name, tenant_id, claim).await? {
                if Some(holder) != except {
                    return Err(ServiceError::UniquenessViolation(claim.key.clone()));
                }
            }
        }
        Ok(())
    }

    async fn commit_write(
        &self,
        write: Write<'_>,
        actor: Uuid,
        action: AuditAction,
        context: Value,
        map_err: fn(StoreError) -> ServiceError,
    ) -> Result<(), ServiceError> {
        let mut tx = self.store.begin().await?;

        let (target, staged) = match &write {
            Write::Insert(r, claims) => (r.id, tx.insert(r, claims).await),
            Write::Update(r, expected, claims) => (r.id, tx.update(r, *expected, claims).await),
            Write::Remove(r) => (r.id, tx.remove(&r.kind, r.id, r.updated_at).await),
        };
        if let Err(e) = staged {
            Self::rollback(tx).await;
            return Err(map_err(e));
        }

        let entry = match self.audit.record(tx.as_mut(), actor, action, &self.kind.name, target, context).await {
            Ok(entry) => entry,
            Err(e) => {
                Self::rollback(tx).await;
                return Err(ServiceError::audit(e));
            }
        };

        tx.commit().await.map_err(map_err)?;
        self.audit.committed(&entry);
        Ok(())
    }

    async fn rollback(tx: Box<dyn Transaction>) {
        if let Err(e) = tx.rollback().await {
            tracing::warn!("Rollback failed: {}", e);
        }
    }

    /// Storage keeps microseconds; round here so what we return is what we stored
    fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(6)
    }

    /// Strictly after `previous`, even when the clock has not moved
    fn next_timestamp(&self, previous: DateTime<Utc>) -> DateTime<Utc> {
        let now = self.now();
        if now > previous {
            now
        } else {
            previous + Duration::microseconds(1)
        }
    }
}
