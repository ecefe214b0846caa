use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::database::models::{KeyClaim, Principal, Resource};
use crate::filter::QueryPlan;
use crate::types::Access;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Record not found")]
    NotFound,

    #[error("Record was modified concurrently")]
    VersionConflict,

    #[error("Token already revoked")]
    AlreadyRevoked,

    #[error("Storage call timed out after {0}ms")]
    Timeout(u64),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Storage collaborator. Reads run outside a transaction; every mutation
/// goes through a [`Transaction`] so the audit append commits with it.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;

    /// Point lookup by id, including soft-deleted rows
    async fn fetch(&self, kind: &str, id: Uuid) -> Result<Option<Resource>, StoreError>;

    /// Id of the active resource currently holding a natural-key value
    async fn key_holder(&self, kind: &str, tenant_id: Uuid, claim: &KeyClaim) -> Result<Option<Uuid>, StoreError>;

    /// Bounded scan: one page of matches plus the total match count
    async fn scan(&self, kind: &str, plan: &QueryPlan) -> Result<(Vec<Resource>, u64), StoreError>;

    async fn principal(&self, id: Uuid) -> Result<Option<Principal>, StoreError>;

    async fn principal_by_login(&self, tenant_id: Option<Uuid>, login: &str) -> Result<Option<Principal>, StoreError>;

    /// Audit trail for one target, in append order
    async fn history(&self, target_type: &str, target_id: Uuid) -> Result<Vec<AuditEntry>, StoreError>;
}

#[async_trait]
pub trait Transaction: Send {
    /// Insert a resource and atomically claim its natural keys
    async fn insert(&mut self, resource: &Resource, claims: &[KeyClaim]) -> Result<(), StoreError>;

    /// Replace a resource row if its `updated_at` still equals `expected`,
    /// swapping its claimed keys for `claims`
    async fn update(
        &mut self,
        resource: &Resource,
        expected: DateTime<Utc>,
        claims: &[KeyClaim],
    ) -> Result<(), StoreError>;

    /// Physically remove a resource (and its keys) if unchanged since `expected`
    async fn remove(&mut self, kind: &str, id: Uuid, expected: DateTime<Utc>) -> Result<(), StoreError>;

    async fn insert_principal(&mut self, principal: &Principal) -> Result<(), StoreError>;

    async fn update_principal_access(
        &mut self,
        id: Uuid,
        access: Access,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn append_audit(&mut self, entry: &AuditEntry) -> Result<(), StoreError>;

    /// Mark a refresh token spent. Fails [`StoreError::AlreadyRevoked`], here
    /// or at commit, when another transaction spent it first.
    async fn revoke_token(&mut self, jti: Uuid, expires_at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
