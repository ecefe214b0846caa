use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::database::store::{Storage, StoreError, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Restore,
    Register,
    Login,
    Rotate,
    Logout,
    ChangeAccess,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Restore => "restore",
            AuditAction::Register => "register",
            AuditAction::Login => "login",
            AuditAction::Rotate => "rotate",
            AuditAction::Logout => "logout",
            AuditAction::ChangeAccess => "change_access",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "create" => AuditAction::Create,
            "update" => AuditAction::Update,
            "delete" => AuditAction::Delete,
            "restore" => AuditAction::Restore,
            "register" => AuditAction::Register,
            "login" => AuditAction::Login,
            "rotate" => AuditAction::Rotate,
            "logout" => AuditAction::Logout,
            "change_access" => AuditAction::ChangeAccess,
            other => return Err(format!("unknown audit action: {}", other)),
        })
    }
}

/// Append-only record of one mutating action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub action: AuditAction,
    pub target_type: String,
    pub target_id: Uuid,
    pub context: Value,
    pub created_at: DateTime<Utc>,
}

/// Appends audit entries inside the caller's storage transaction. Nothing is
/// logged for an entry until the enclosing transaction has committed.
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    log_entries: bool,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn Storage>, clock: Arc<dyn Clock>, log_entries: bool) -> Self {
        Self { store, clock, log_entries }
    }

    pub async fn record(
        &self,
        tx: &mut dyn Transaction,
        actor_id: Uuid,
        action: AuditAction,
        target_type: &str,
        target_id: Uuid,
        context: Value,
    ) -> Result<AuditEntry, StoreError> {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            actor_id,
            action,
            target_type: target_type.to_string(),
            target_id,
            context,
            created_at: self.clock.now(),
        };
        tx.append_audit(&entry).await?;
        Ok(entry)
    }

    /// Record an event with no enclosing mutation, such as a login
    pub async fn record_now(
        &self,
        actor_id: Uuid,
        action: AuditAction,
        target_type: &str,
        target_id: Uuid,
        context: Value,
    ) -> Result<AuditEntry, StoreError> {
        let mut tx = self.store.begin().await?;
        let entry = match self.record(tx.as_mut(), actor_id, action, target_type, target_id, context).await {
            Ok(entry) => entry,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!("Rollback after failed audit append also failed: {}", rollback);
                }
                return Err(e);
            }
        };
        tx.commit().await?;
        self.committed(&entry);
        Ok(entry)
    }

    /// Called once the transaction holding `entry` has committed
    pub fn committed(&self, entry: &AuditEntry) {
        if self.log_entries {
            tracing::info!(
                audit_id = %entry.id,
                actor = %entry.actor_id,
                action = %entry.action,
                target_type = %entry.target_type,
                target = %entry.target_id,
                "audit"
            );
        }
    }

    pub async fn history(&self, target_type: &str, target_id: Uuid) -> Result<Vec<AuditEntry>, StoreError> {
        self.store.history(target_type, target_id).await
    }
}
