use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Columns owned by the engine; API payloads may not carry them
const SYSTEM_FIELDS: &[&str] = &["id", "kind", "tenant_id", "owner_id", "created_at", "updated_at", "deleted_at"];

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("System field '{0}' cannot be set via API input")]
    SystemFieldNotAllowed(String),
    #[error("Invalid JSON format: {0}")]
    InvalidJson(String),
}

/// Payload of one resource with change tracking against the stored version
#[derive(Debug, Clone, Default)]
pub struct Record {
    /// Stored payload (None for creates)
    original: Option<Map<String, Value>>,
    fields: Map<String, Value>,
}

impl Record {
    /// Payload for a create, rejecting system fields
    pub fn from_api_input(json: Value) -> Result<Self, RecordError> {
        Ok(Self { original: None, fields: Self::checked_object(json)? })
    }

    /// Stored payload about to receive an update
    pub fn from_stored(payload: &Value) -> Self {
        let fields = payload.as_object().cloned().unwrap_or_default();
        Self { original: Some(fields.clone()), fields }
    }

    /// Apply a partial update. Present keys overwrite, `null` removes the key,
    /// absent keys stay as they were.
    pub fn apply_partial(&mut self, partial: Value) -> Result<&mut Self, RecordError> {
        for (key, value) in Self::checked_object(partial)? {
            if value.is_null() {
                self.fields.remove(&key);
            } else {
                self.fields.insert(key, value);
            }
        }
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Keys whose value differs from the stored payload, sorted
    pub fn changed_fields(&self) -> Vec<String> {
        let Some(original) = &self.original else {
            return self.fields.keys().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        };
        let keys: BTreeSet<&String> = original.keys().chain(self.fields.keys()).collect();
        keys.into_iter()
            .filter(|k| original.get(*k) != self.fields.get(*k))
            .cloned()
            .collect()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn into_json(self) -> Value {
        Value::Object(self.fields)
    }

    fn checked_object(json: Value) -> Result<Map<String, Value>, RecordError> {
        match json {
            Value::Object(map) => {
                if let Some(key) = map.keys().find(|k| SYSTEM_FIELDS.contains(&k.as_str())) {
                    return Err(RecordError::SystemFieldNotAllowed(key.clone()));
                }
                Ok(map)
            }
            _ => Err(RecordError::InvalidJson("Expected JSON object".to_string())),
        }
    }
}
