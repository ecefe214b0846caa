use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::auth::RevocationList;
use crate::database::models::{KeyClaim, Principal, Resource};
use crate::database::store::{Storage, StoreError, Transaction};
use crate::filter::{compare_rows, QueryPlan};
use crate::types::Access;

/// (kind, tenant, key name, key value)
type KeySlot = (String, Uuid, String, String);

#[derive(Debug, Default)]
struct MemoryState {
    resources: HashMap<Uuid, Resource>,
    keys: HashMap<KeySlot, Uuid>,
    principals: HashMap<Uuid, Principal>,
    revoked: HashMap<Uuid, DateTime<Utc>>,
    audit: Vec<AuditEntry>,
}

/// Prior value of one slot touched by a commit in progress
enum Undo {
    Resource(Uuid, Option<Resource>),
    Key(KeySlot, Option<Uuid>),
    Principal(Uuid, Option<Principal>),
    Revoked(Uuid),
    Audit,
}

impl MemoryState {
    fn resource(&self, kind: &str, id: Uuid) -> Option<&Resource> {
        self.resources.get(&id).filter(|r| r.kind == kind)
    }

    fn check_version(&self, kind: &str, id: Uuid, expected: DateTime<Utc>) -> Result<(), StoreError> {
        match self.resource(kind, id) {
            None => Err(StoreError::NotFound),
            Some(current) if current.updated_at != expected => Err(StoreError::VersionConflict),
            Some(_) => Ok(()),
        }
    }

    fn claim_keys(&mut self, resource: &Resource, claims: &[KeyClaim], journal: &mut Vec<Undo>) -> Result<(), StoreError> {
        for claim in claims {
            let slot = (resource.kind.clone(), resource.tenant_id, claim.key.clone(), claim.value.clone());
            match self.keys.get(&slot) {
                Some(holder) if *holder != resource.id => return Err(StoreError::UniqueViolation(claim.key.clone())),
                _ => {
                    let prior = self.keys.insert(slot.clone(), resource.id);
                    journal.push(Undo::Key(slot, prior));
                }
            }
        }
        Ok(())
    }

    fn release_keys(&mut self, id: Uuid, journal: &mut Vec<Undo>) {
        let held: Vec<KeySlot> = self.keys.iter().filter(|(_, holder)| **holder == id).map(|(slot, _)| slot.clone()).collect();
        for slot in held {
            let prior = self.keys.remove(&slot);
            journal.push(Undo::Key(slot, prior));
        }
    }

    fn put_resource(&mut self, resource: Resource, journal: &mut Vec<Undo>) {
        let id = resource.id;
        let prior = self.resources.insert(id, resource);
        journal.push(Undo::Resource(id, prior));
    }

    fn apply(&mut self, op: Op, journal: &mut Vec<Undo>) -> Result<(), StoreError> {
        match op {
            Op::Insert(resource, claims) => {
                if self.resources.contains_key(&resource.id) {
                    return Err(StoreError::UniqueViolation("id".to_string()));
                }
                self.claim_keys(&resource, &claims, journal)?;
                self.put_resource(resource, journal);
            }
            Op::Update(resource, expected, claims) => {
                self.check_version(&resource.kind, resource.id, expected)?;
                self.release_keys(resource.id, journal);
                self.claim_keys(&resource, &claims, journal)?;
                self.put_resource(resource, journal);
            }
            Op::Remove(kind, id, expected) => {
                self.check_version(&kind, id, expected)?;
                self.release_keys(id, journal);
                let prior = self.resources.remove(&id);
                journal.push(Undo::Resource(id, prior));
            }
            Op::InsertPrincipal(principal) => {
                let taken = self.principals.contains_key(&principal.id)
                    || self
                        .principals
                        .values()
                        .any(|p| p.tenant_id == principal.tenant_id && p.login == principal.login);
                if taken {
                    return Err(StoreError::UniqueViolation("login".to_string()));
                }
                journal.push(Undo::Principal(principal.id, None));
                self.principals.insert(principal.id, principal);
            }
            Op::UpdateAccess(id, access, updated_at) => {
                let principal = self.principals.get_mut(&id).ok_or(StoreError::NotFound)?;
                journal.push(Undo::Principal(id, Some(principal.clone())));
                principal.access = access;
                principal.updated_at = updated_at;
            }
            Op::Revoke(jti, expires_at) => {
                if self.revoked.contains_key(&jti) {
                    return Err(StoreError::AlreadyRevoked);
                }
                self.revoked.insert(jti, expires_at);
                journal.push(Undo::Revoked(jti));
            }
            Op::Audit(entry) => {
                self.audit.push(entry);
                journal.push(Undo::Audit);
            }
        }
        Ok(())
    }

    /// Put back every slot a failed commit touched, newest first
    fn undo(&mut self, journal: Vec<Undo>) {
        for undo in journal.into_iter().rev() {
            match undo {
                Undo::Resource(id, Some(prior)) => {
                    self.resources.insert(id, prior);
                }
                Undo::Resource(id, None) => {
                    self.resources.remove(&id);
                }
                Undo::Key(slot, Some(holder)) => {
                    self.keys.insert(slot, holder);
                }
                Undo::Key(slot, None) => {
                    self.keys.remove(&slot);
                }
                Undo::Principal(id, Some(prior)) => {
                    self.principals.insert(id, prior);
                }
                Undo::Principal(id, None) => {
                    self.principals.remove(&id);
                }
                Undo::Revoked(jti) => {
                    self.revoked.remove(&jti);
                }
                Undo::Audit => {
                    self.audit.pop();
                }
            }
        }
    }
}

enum Op {
    Insert(Resource, Vec<KeyClaim>),
    Update(Resource, DateTime<Utc>, Vec<KeyClaim>),
    Remove(String, Uuid, DateTime<Utc>),
    InsertPrincipal(Principal),
    UpdateAccess(Uuid, Access, DateTime<Utc>),
    Revoke(Uuid, DateTime<Utc>),
    Audit(AuditEntry),
}

/// In-process [`Storage`]. Transactions buffer their writes and apply them
/// all-or-nothing under the write lock at commit; a failing op undoes the
/// ones applied before it.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<R>(&self, f: impl FnOnce(&MemoryState) -> R) -> Result<R, StoreError> {
        let guard = self.state.read().map_err(|_| poisoned())?;
        Ok(f(&guard))
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("memory store lock poisoned".to_string())
}

#[async_trait]
impl RevocationList for MemoryStore {
    async fn is_revoked(&self, jti: Uuid) -> Result<bool, StoreError> {
        self.read(|s| s.revoked.contains_key(&jti))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut guard = self.state.write().map_err(|_| poisoned())?;
        let before = guard.revoked.len();
        guard.revoked.retain(|_, expires_at| *expires_at > now);
        Ok((before - guard.revoked.len()) as u64)
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        Ok(Box::new(MemoryTransaction { state: self.state.clone(), ops: Vec::new() }))
    }

    async fn fetch(&self, kind: &str, id: Uuid) -> Result<Option<Resource>, StoreError> {
        self.read(|s| s.resource(kind, id).cloned())
    }

    async fn key_holder(&self, kind: &str, tenant_id: Uuid, claim: &KeyClaim) -> Result<Option<Uuid>, StoreError> {
        let slot = (kind.to_string(), tenant_id, claim.key.clone(), claim.value.clone());
        self.read(|s| s.keys.get(&slot).copied())
    }

    async fn scan(&self, kind: &str, plan: &QueryPlan) -> Result<(Vec<Resource>, u64), StoreError> {
        self.read(|s| {
            let mut matches: Vec<&Resource> = s
                .resources
                .values()
                .filter(|r| r.kind == kind)
                .filter(|r| match plan.scope {
                    Some(scope) => {
                        r.tenant_id == scope.tenant_id && scope.owner_id.map_or(true, |owner| r.owner_id == owner)
                    }
                    None => true,
                })
                .filter(|r| plan.include_deleted || r.is_active())
                .filter(|r| plan.predicate.as_ref().map_or(true, |p| p.matches(*r)))
                .collect();
            matches.sort_by(|a, b| compare_rows(*a, *b, &plan.order_by));

            let total = matches.len() as u64;
            let page = matches
                .into_iter()
                .skip(plan.offset as usize)
                .take(plan.limit as usize)
                .cloned()
                .collect();
            (page, total)
        })
    }

    async fn principal(&self, id: Uuid) -> Result<Option<Principal>, StoreError> {
        self.read(|s| s.principals.get(&id).cloned())
    }

    async fn principal_by_login(&self, tenant_id: Option<Uuid>, login: &str) -> Result<Option<Principal>, StoreError> {
        self.read(|s| {
            s.principals
                .values()
                .find(|p| p.tenant_id == tenant_id && p.login == login)
                .cloned()
        })
    }

    async fn history(&self, target_type: &str, target_id: Uuid) -> Result<Vec<AuditEntry>, StoreError> {
        self.read(|s| {
            s.audit
                .iter()
                .filter(|e| e.target_type == target_type && e.target_id == target_id)
                .cloned()
                .collect()
        })
    }
}

pub struct MemoryTransaction {
    state: Arc<RwLock<MemoryState>>,
    ops: Vec<Op>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn insert(&mut self, resource: &Resource, claims: &[KeyClaim]) -> Result<(), StoreError> {
        self.ops.push(Op::Insert(resource.clone(), claims.to_vec()));
        Ok(())
    }

    async fn update(
        &mut self,
        resource: &Resource,
        expected: DateTime<Utc>,
        claims: &[KeyClaim],
    ) -> Result<(), StoreError> {
        self.ops.push(Op::Update(resource.clone(), expected, claims.to_vec()));
        Ok(())
    }

    async fn remove(&mut self, kind: &str, id: Uuid, expected: DateTime<Utc>) -> Result<(), StoreError> {
        self.ops.push(Op::Remove(kind.to_string(), id, expected));
        Ok(())
    }

    async fn insert_principal(&mut self, principal: &Principal) -> Result<(), StoreError> {
        self.ops.push(Op::InsertPrincipal(principal.clone()));
        Ok(())
    }

    async fn update_principal_access(
        &mut self,
        id: Uuid,
        access: Access,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.ops.push(Op::UpdateAccess(id, access, updated_at));
        Ok(())
    }

    async fn append_audit(&mut self, entry: &AuditEntry) -> Result<(), StoreError> {
        self.ops.push(Op::Audit(entry.clone()));
        Ok(())
    }

    async fn revoke_token(&mut self, jti: Uuid, expires_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.ops.push(Op::Revoke(jti, expires_at));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction { state, ops } = *self;
        let mut guard = state.write().map_err(|_| poisoned())?;
        let mut journal = Vec::new();
        for op in ops {
            if let Err(e) = guard.apply(op, &mut journal) {
                guard.undo(journal);
                return Err(e);
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
