#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crudkit::audit::{AuditEntry, AuditRecorder};
use crudkit::auth::{PrincipalClaims, Session, TokenIssuer};
use crudkit::clock::{Clock, ManualClock};
use crudkit::config::AppConfig;
use crudkit::database::models::{KeyClaim, Principal, Resource, ResourceKind};
use crudkit::database::{MemoryStore, Storage, StoreError, Transaction};
use crudkit::filter::{QueryCompiler, QueryPlan};
use crudkit::services::{AuthService, ResourceService};
use crudkit::types::Access;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub code: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
}

impl Ticket {
    pub fn new(code: &str, title: &str) -> Self {
        Self { code: code.to_string(), title: title.to_string(), status: None, priority: None }
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn status(mut self, status: &str) -> Self {
        self.status = Some(status.to_string());
        self
    }
}

/// Tickets: unique `code` per tenant, restorable, locked once closed
pub fn ticket_kind() -> ResourceKind {
    ResourceKind::new("ticket")
        .filterable(["code", "title", "status", "priority"])
        .sortable(["code", "priority"])
        .unique("code", ["code"])
        .restorable()
        .locked_when(|payload| payload.get("status") == Some(&json!("closed")))
}

/// Wires every service against one in-memory store and a manual clock
pub struct TestContext {
    pub memory: MemoryStore,
    pub store: Arc<dyn Storage>,
    pub clock: Arc<ManualClock>,
    pub config: AppConfig,
    pub auth: AuthService,
}

impl TestContext {
    pub fn new() -> Self {
        let memory = MemoryStore::new();
        Self::build(memory.clone(), Arc::new(memory))
    }

    /// Same wiring, but audit appends fail while the returned switch is on
    pub fn with_failing_audit() -> (Self, Arc<AtomicBool>) {
        let memory = MemoryStore::new();
        let fail = Arc::new(AtomicBool::new(false));
        let store = FailingAuditStore { inner: memory.clone(), fail: fail.clone() };
        (Self::build(memory, Arc::new(store)), fail)
    }

    fn build(memory: MemoryStore, store: Arc<dyn Storage>) -> Self {
        let config = AppConfig::development();
        let clock = Arc::new(ManualClock::default());
        let issuer = TokenIssuer::new(&config.security, clock.clone(), Arc::new(memory.clone()))
            .expect("development secret is set");
        let auth = AuthService::new(store.clone(), issuer, Self::audit_for(&store, &clock), clock.clone());
        Self { memory, store, clock, config, auth }
    }

    fn audit_for(store: &Arc<dyn Storage>, clock: &Arc<ManualClock>) -> AuditRecorder {
        let clock: Arc<dyn Clock> = clock.clone();
        AuditRecorder::new(store.clone(), clock, false)
    }

    pub fn resources<T>(&self, kind: ResourceKind) -> ResourceService<T>
    where
        T: Serialize + serde::de::DeserializeOwned,
    {
        ResourceService::new(
            kind,
            self.store.clone(),
            Self::audit_for(&self.store, &self.clock),
            self.clock.clone(),
            QueryCompiler::new(&self.config.query),
        )
    }

    pub fn tickets(&self) -> ResourceService<Ticket> {
        self.resources(ticket_kind())
    }

    pub async fn session(&self, tenant: Uuid, login: &str, access: Access) -> Result<Session> {
        Ok(self.auth.register(Some(tenant), login, "correct-horse", access).await?)
    }

    /// Register a principal and return its verified claims
    pub async fn principal(&self, tenant: Uuid, login: &str, access: Access) -> Result<PrincipalClaims> {
        let session = self.session(tenant, login, access).await?;
        Ok(self.auth.verify(&session.access_token)?)
    }
}

struct FailingAuditStore {
    inner: MemoryStore,
    fail: Arc<AtomicBool>,
}

#[async_trait]
impl Storage for FailingAuditStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let inner = self.inner.begin().await?;
        Ok(Box::new(FailingAuditTx { inner, fail: self.fail.load(Ordering::SeqCst) }))
    }

    async fn fetch(&self, kind: &str, id: Uuid) -> Result<Option<Resource>, StoreError> {
        self.inner.fetch(kind, id).await
    }

    async fn key_holder(&self, kind: &str, tenant_id: Uuid, claim: &KeyClaim) -> Result<Option<Uuid>, StoreError> {
        self.inner.key_holder(kind, tenant_id, claim).await
    }

    async fn scan(&self, kind: &str, plan: &QueryPlan) -> Result<(Vec<Resource>, u64), StoreError> {
        self.inner.scan(kind, plan).await
    }

    async fn principal(&self, id: Uuid) -> Result<Option<Principal>, StoreError> {
        self.inner.principal(id).await
    }

    async fn principal_by_login(&self, tenant_id: Option<Uuid>, login: &str) -> Result<Option<Principal>, StoreError> {
        self.inner.principal_by_login(tenant_id, login).await
    }

    async fn history(&self, target_type: &str, target_id: Uuid) -> Result<Vec<AuditEntry>, StoreError> {
        self.inner.history(target_type, target_id).await
    }
}

struct FailingAuditTx {
    inner: Box<dyn Transaction>,
    fail: bool,
}

#[async_trait]
impl Transaction for FailingAuditTx {
    async fn insert(&mut self, resource: &Resource, claims: &[KeyClaim]) -> Result<(), StoreError> {
        self.inner.insert(resource, claims).await
    }

    async fn update(&mut self, resource: &Resource, expected: DateTime<Utc>, claims: &[KeyClaim]) -> Result<(), StoreError> {
        self.inner.update(resource, expected, claims).await
    }

    async fn remove(&mut self, kind: &str, id: Uuid, expected: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.remove(kind, id, expected).await
    }

    async fn insert_principal(&mut self, principal: &Principal) -> Result<(), StoreError> {
        self.inner.insert_principal(principal).await
    }

    async fn update_principal_access(&mut self, id: Uuid, access: Access, updated_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.update_principal_access(id, access, updated_at).await
    }

    async fn append_audit(&mut self, entry: &AuditEntry) -> Result<(), StoreError> {
        if self.fail {
            return Err(StoreError::Backend("audit log unavailable".to_string()));
        }
        self.inner.append_audit(entry).await
    }

    async fn revoke_token(&mut self, jti: Uuid, expires_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.revoke_token(jti, expires_at).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}
