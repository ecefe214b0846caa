use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::filter::{Cell, Field, Row, SystemField};

/// Stored resource. `payload` is opaque to the engine; services view it as `T`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource<T = Value> {
    pub id: Uuid,
    pub kind: String,
    pub tenant_id: Uuid,
    pub owner_id: Uuid,
    pub payload: T,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl<T> Resource<T> {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn map_payload<U>(self, f: impl FnOnce(T) -> U) -> Resource<U> {
        Resource {
            id: self.id,
            kind: self.kind,
            tenant_id: self.tenant_id,
            owner_id: self.owner_id,
            payload: f(self.payload),
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        }
    }
}

impl Resource<Value> {
    pub fn typed<U: DeserializeOwned>(mut self) -> Result<Resource<U>, serde_json::Error> {
        let payload = serde_json::from_value(std::mem::take(&mut self.payload))?;
        Ok(self.map_payload(|_| payload))
    }
}

impl Row for Resource<Value> {
    fn cell(&self, field: &Field) -> Cell<'_> {
        match field {
            Field::System(SystemField::Id) => Cell::Uuid(self.id),
            Field::System(SystemField::OwnerId) => Cell::Uuid(self.owner_id),
            Field::System(SystemField::CreatedAt) => Cell::Time(self.created_at),
            Field::System(SystemField::UpdatedAt) => Cell::Time(self.updated_at),
            Field::System(SystemField::DeletedAt) => self.deleted_at.map(Cell::Time).unwrap_or(Cell::Missing),
            Field::Payload(key) => self.payload.get(key).map(Cell::Json).unwrap_or(Cell::Missing),
        }
    }
}
