use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Access;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    pub login: String,
    pub access: Access,
    pub tenant_id: Option<Uuid>,
    /// argon2 PHC string
    #[serde(skip_serializing, default)]
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Principal {
    /// Tenant-less principals form a partition of their own
    pub fn partition(&self) -> Uuid {
        self.tenant_id.unwrap_or(self.id)
    }
}
