use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::filter::SystemField;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Any principal in the tenant may act on the resource
    Tenant,
    /// Only the owner (or an elevated principal in the tenant)
    Owner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePolicy {
    Soft,
    Hard,
}

/// Returns true when the payload is in a state that forbids deletion
pub type LockRule = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Natural key: a set of payload fields unique per tenant among active records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueKey {
    pub name: String,
    pub fields: Vec<String>,
}

/// One claimed natural-key value, stored alongside the resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyClaim {
    pub key: String,
    pub value: String,
}

impl UniqueKey {
    /// Key value for a payload, or `None` when any part is missing or null
    /// (such records do not take part in the constraint)
    pub fn claim(&self, payload: &Value) -> Option<KeyClaim> {
        let mut parts = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            match payload.get(field) {
                None | Some(Value::Null) => return None,
                Some(v) => parts.push(v.clone()),
            }
        }
        Some(KeyClaim { key: self.name.clone(), value: Value::Array(parts).to_string() })
    }
}

/// Declaration of a resource kind: what callers may filter and sort on,
/// which keys are unique, and how scoping and deletion behave
#[derive(Clone)]
pub struct ResourceKind {
    pub name: String,
    pub filter_fields: Vec<String>,
    pub sort_fields: Vec<String>,
    pub unique_keys: Vec<UniqueKey>,
    pub scope: Scope,
    pub delete_policy: DeletePolicy,
    pub lock_rule: Option<LockRule>,
    pub restorable: bool,
}

const SYSTEM_FILTER_FIELDS: &[SystemField] = &[
    SystemField::Id,
    SystemField::OwnerId,
    SystemField::CreatedAt,
    SystemField::UpdatedAt,
    SystemField::DeletedAt,
];

const SYSTEM_SORT_FIELDS: &[SystemField] = &[SystemField::Id, SystemField::CreatedAt, SystemField::UpdatedAt];

impl ResourceKind {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter_fields: SYSTEM_FILTER_FIELDS.iter().map(|f| f.column().to_string()).collect(),
            sort_fields: SYSTEM_SORT_FIELDS.iter().map(|f| f.column().to_string()).collect(),
            unique_keys: Vec::new(),
            scope: Scope::Tenant,
            delete_policy: DeletePolicy::Soft,
            lock_rule: None,
            restorable: false,
        }
    }

    /// Payload fields callers may filter on
    pub fn filterable<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            let field = field.into();
            if !self.filter_fields.contains(&field) {
                self.filter_fields.push(field);
            }
        }
        self
    }

    /// Payload fields callers may sort on
    pub fn sortable<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            let field = field.into();
            if !self.sort_fields.contains(&field) {
                self.sort_fields.push(field);
            }
        }
        self
    }

    pub fn unique<I, S>(mut self, name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique_keys.push(UniqueKey {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn owner_scoped(mut self) -> Self {
        self.scope = Scope::Owner;
        self
    }

    pub fn hard_delete(mut self) -> Self {
        self.delete_policy = DeletePolicy::Hard;
        self
    }

    pub fn locked_when(mut self, rule: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.lock_rule = Some(Arc::new(rule));
        self
    }

    pub fn restorable(mut self) -> Self {
        self.restorable = true;
        self
    }

    pub fn is_locked(&self, payload: &Value) -> bool {
        self.lock_rule.as_ref().is_some_and(|rule| rule(payload))
    }

    pub fn key_claims(&self, payload: &Value) -> Vec<KeyClaim> {
        self.unique_keys.iter().filter_map(|k| k.claim(payload)).collect()
    }
}

impl fmt::Debug for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceKind")
            .field("name", &self.name)
            .field("filter_fields", &self.filter_fields)
            .field("sort_fields", &self.sort_fields)
            .field("unique_keys", &self.unique_keys)
            .field("scope", &self.scope)
            .field("delete_policy", &self.delete_policy)
            .field("locked", &self.lock_rule.is_some())
            .field("restorable", &self.restorable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_keeps_system_fields_and_dedupes() {
        let kind = ResourceKind::new("ticket").filterable(["code", "status", "code"]).sortable(["code"]);
        assert!(kind.filter_fields.iter().any(|f| f == "created_at"));
        assert_eq!(kind.filter_fields.iter().filter(|f| *f == "code").count(), 1);
        assert!(kind.sort_fields.iter().any(|f| f == "code"));
    }

    #[test]
    fn unique_key_skips_incomplete_payloads() {
        let kind = ResourceKind::new("ticket").unique("code", ["code"]).unique("slot", ["room", "day"]);
        let claims = kind.key_claims(&json!({ "code": "ABC123", "room": 4 }));
        assert_eq!(claims, vec![KeyClaim { key: "code".into(), value: "[\"ABC123\"]".into() }]);
        assert!(kind.key_claims(&json!({ "code": null })).is_empty());
    }

    #[test]
    fn lock_rule_applies() {
        let kind = ResourceKind::new("invoice").locked_when(|p| p["status"] == "paid");
        assert!(kind.is_locked(&json!({ "status": "paid" })));
        assert!(!kind.is_locked(&json!({ "status": "draft" })));
    }
}
