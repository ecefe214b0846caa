use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::database::store::StoreError;

/// Read side of the spent refresh-token set.
///
/// Tokens are marked spent through [`crate::database::Transaction::revoke_token`]
/// so the revocation commits together with its audit entry. Implemented by
/// the storage backends.
#[async_trait]
pub trait RevocationList: Send + Sync {
    async fn is_revoked(&self, jti: Uuid) -> Result<bool, StoreError>;

    /// Forget entries whose token has expired by `now`; an expired token is
    /// rejected before the list is consulted. Returns the number dropped.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}
