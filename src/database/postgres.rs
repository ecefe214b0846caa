use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{
    postgres::{PgArguments, PgPoolOptions, PgRow},
    PgPool, Postgres, Row,
};
use std::future::Future;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::auth::RevocationList;
use crate::config::DatabaseConfig;
use crate::database::models::{KeyClaim, Principal, Resource};
use crate::database::store::{Storage, StoreError, Transaction};
use crate::filter::{PlanSql, QueryPlan, SqlParam};
use crate::types::Access;

const MIGRATION: &str = include_str!("../../migrations/0001_init.sql");

/// PostgreSQL-backed [`Storage`]. Every call is bounded by the configured
/// statement timeout and surfaces as [`StoreError::Timeout`] when exceeded.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    timeout_ms: u64,
}

impl PgStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| StoreError::Backend("DATABASE_URL is not configured".to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect(url)
            .await?;

        info!("Connected database pool (max {} connections)", config.max_connections);
        Ok(Self::from_pool(pool, config.statement_timeout_ms))
    }

    pub fn from_pool(pool: PgPool, timeout_ms: u64) -> Self {
        Self { pool, timeout_ms }
    }

    /// Apply the bundled schema. Statements are idempotent.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in MIGRATION.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            timed(self.timeout_ms, sqlx::query(statement).execute(&self.pool)).await?;
        }
        info!("Database schema is up to date");
        Ok(())
    }

    /// Pings the pool to ensure connectivity
    pub async fn health_check(&self) -> Result<(), StoreError> {
        timed(self.timeout_ms, sqlx::query("SELECT 1").execute(&self.pool)).await?;
        Ok(())
    }
}

async fn timed<T, F>(timeout_ms: u64, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(result) => result.map_err(map_sqlx),
        Err(_) => Err(StoreError::Timeout(timeout_ms)),
    }
}

fn map_sqlx(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some("23505") {
            return StoreError::UniqueViolation(db.constraint().unwrap_or("unique").to_string());
        }
    }
    StoreError::Sqlx(err)
}

fn bind_param<'q>(
    q: sqlx::query::Query<'q, Postgres, PgArguments>,
    p: &'q SqlParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match p {
        SqlParam::Text(s) => q.bind(s.as_str()),
        SqlParam::Json(v) => q.bind(v),
    }
}

fn resource_from_row(row: &PgRow) -> Result<Resource, sqlx::Error> {
    Ok(Resource {
        id: row.try_get("id")?,
        kind: row.try_get("kind")?,
        tenant_id: row.try_get("tenant_id")?,
        owner_id: row.try_get("owner_id")?,
        payload: row.try_get::<Value, _>("payload")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn principal_from_row(row: &PgRow) -> Result<Principal, StoreError> {
    let access: String = row.try_get("access")?;
    Ok(Principal {
        id: row.try_get("id")?,
        login: row.try_get("login")?,
        access: access.parse::<Access>().map_err(StoreError::Backend)?,
        tenant_id: row.try_get("tenant_id")?,
        fingerprint: row.try_get("fingerprint")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn audit_from_row(row: &PgRow) -> Result<AuditEntry, StoreError> {
    let action: String = row.try_get("action")?;
    Ok(AuditEntry {
        id: row.try_get("id")?,
        actor_id: row.try_get("actor_id")?,
        action: action.parse().map_err(StoreError::Backend)?,
        target_type: row.try_get("target_type")?,
        target_id: row.try_get("target_id")?,
        context: row.try_get("context")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl Storage for PgStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let tx = timed(self.timeout_ms, self.pool.begin()).await?;
        Ok(Box::new(PgTransaction { tx, timeout_ms: self.timeout_ms }))
    }

    async fn fetch(&self, kind: &str, id: Uuid) -> Result<Option<Resource>, StoreError> {
        let row = timed(
            self.timeout_ms,
            sqlx::query("SELECT * FROM resources WHERE id = $1 AND kind = $2")
                .bind(id)
                .bind(kind)
                .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.as_ref().map(resource_from_row).transpose()?)
    }

    async fn key_holder(&self, kind: &str, tenant_id: Uuid, claim: &KeyClaim) -> Result<Option<Uuid>, StoreError> {
        let row = timed(
            self.timeout_ms,
            sqlx::query(
                "SELECT resource_id FROM resource_unique_keys \
                 WHERE kind = $1 AND tenant_id = $2 AND key_name = $3 AND key_value = $4",
            )
            .bind(kind)
            .bind(tenant_id)
            .bind(&claim.key)
            .bind(&claim.value)
            .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(|r| r.try_get::<Uuid, _>("resource_id")).transpose()?)
    }

    /// Page and count read one snapshot so `records` agrees with `data`
    async fn scan(&self, kind: &str, plan: &QueryPlan) -> Result<(Vec<Resource>, u64), StoreError> {
        let mut tx = timed(self.timeout_ms, self.pool.begin()).await?;
        timed(
            self.timeout_ms,
            sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY").execute(&mut *tx),
        )
        .await?;

        let select = PlanSql::new(kind, plan).select();
        let mut q = sqlx::query(&select.query);
        for p in select.params.iter() {
            q = bind_param(q, p);
        }
        let rows = timed(self.timeout_ms, q.fetch_all(&mut *tx)).await?;
        let data = rows.iter().map(resource_from_row).collect::<Result<Vec<_>, _>>()?;

        let count = PlanSql::new(kind, plan).count();
        let mut q = sqlx::query(&count.query);
        for p in count.params.iter() {
            q = bind_param(q, p);
        }
        let row = timed(self.timeout_ms, q.fetch_one(&mut *tx)).await?;
        let total: i64 = row.try_get("count")?;

        timed(self.timeout_ms, tx.commit()).await?;
        Ok((data, total.max(0) as u64))
    }

    async fn principal(&self, id: Uuid) -> Result<Option<Principal>, StoreError> {
        let row = timed(
            self.timeout_ms,
            sqlx::query("SELECT * FROM principals WHERE id = $1").bind(id).fetch_optional(&self.pool),
        )
        .await?;
        row.as_ref().map(principal_from_row).transpose()
    }

    async fn principal_by_login(&self, tenant_id: Option<Uuid>, login: &str) -> Result<Option<Principal>, StoreError> {
        let row = timed(
            self.timeout_ms,
            sqlx::query("SELECT * FROM principals WHERE tenant_id IS NOT DISTINCT FROM $1 AND login = $2")
                .bind(tenant_id)
                .bind(login)
                .fetch_optional(&self.pool),
        )
        .await?;
        row.as_ref().map(principal_from_row).transpose()
    }

    async fn history(&self, target_type: &str, target_id: Uuid) -> Result<Vec<AuditEntry>, StoreError> {
        let rows = timed(
            self.timeout_ms,
            sqlx::query("SELECT * FROM audit_log WHERE target_type = $1 AND target_id = $2 ORDER BY seq")
                .bind(target_type)
                .bind(target_id)
                .fetch_all(&self.pool),
        )
        .await?;
        rows.iter().map(audit_from_row).collect()
    }
}

#[async_trait]
impl RevocationList for PgStore {
    async fn is_revoked(&self, jti: Uuid) -> Result<bool, StoreError> {
        let row = timed(
            self.timeout_ms,
            sqlx::query("SELECT 1 FROM revoked_tokens WHERE jti = $1").bind(jti).fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = timed(
            self.timeout_ms,
            sqlx::query("DELETE FROM revoked_tokens WHERE expires_at <= $1").bind(now).execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected())
    }
}

pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    timeout_ms: u64,
}

impl PgTransaction {
    async fn claim_keys(&mut self, resource: &Resource, claims: &[KeyClaim]) -> Result<(), StoreError> {
        for claim in claims {
            let inserted = timed(
                self.timeout_ms,
                sqlx::query(
                    "INSERT INTO resource_unique_keys (kind, tenant_id, key_name, key_value, resource_id) \
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(&resource.kind)
                .bind(resource.tenant_id)
                .bind(&claim.key)
                .bind(&claim.value)
                .bind(resource.id)
                .execute(&mut *self.tx),
            )
            .await;
            match inserted {
                Err(StoreError::UniqueViolation(_)) => return Err(StoreError::UniqueViolation(claim.key.clone())),
                other => {
                    other?;
                }
            }
        }
        Ok(())
    }

    async fn release_keys(&mut self, id: Uuid) -> Result<(), StoreError> {
        timed(
            self.timeout_ms,
            sqlx::query("DELETE FROM resource_unique_keys WHERE resource_id = $1").bind(id).execute(&mut *self.tx),
        )
        .await?;
        Ok(())
    }

    /// Zero rows touched: tell a vanished row apart from a stale version
    async fn missed(&mut self, kind: &str, id: Uuid) -> Result<StoreError, StoreError> {
        let row = timed(
            self.timeout_ms,
            sqlx::query("SELECT 1 FROM resources WHERE id = $1 AND kind = $2")
                .bind(id)
                .bind(kind)
                .fetch_optional(&mut *self.tx),
        )
        .await?;
        Ok(if row.is_some() { StoreError::VersionConflict } else { StoreError::NotFound })
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn insert(&mut self, resource: &Resource, claims: &[KeyClaim]) -> Result<(), StoreError> {
        timed(
            self.timeout_ms,
            sqlx::query(
                "INSERT INTO resources (id, kind, tenant_id, owner_id, payload, created_at, updated_at, deleted_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(resource.id)
            .bind(&resource.kind)
            .bind(resource.tenant_id)
            .bind(resource.owner_id)
            .bind(&resource.payload)
            .bind(resource.created_at)
            .bind(resource.updated_at)
            .bind(resource.deleted_at)
            .execute(&mut *self.tx),
        )
        .await?;
        self.claim_keys(resource, claims).await
    }

    async fn update(
        &mut self,
        resource: &Resource,
        expected: DateTime<Utc>,
        claims: &[KeyClaim],
    ) -> Result<(), StoreError> {
        let result = timed(
            self.timeout_ms,
            sqlx::query(
                "UPDATE resources SET payload = $1, updated_at = $2, deleted_at = $3 \
                 WHERE id = $4 AND kind = $5 AND updated_at = $6",
            )
            .bind(&resource.payload)
            .bind(resource.updated_at)
            .bind(resource.deleted_at)
            .bind(resource.id)
            .bind(&resource.kind)
            .bind(expected)
            .execute(&mut *self.tx),
        )
        .await?;
        if result.rows_affected() == 0 {
            return Err(self.missed(&resource.kind, resource.id).await?);
        }
        self.release_keys(resource.id).await?;
        self.claim_keys(resource, claims).await
    }

    async fn remove(&mut self, kind: &str, id: Uuid, expected: DateTime<Utc>) -> Result<(), StoreError> {
        let result = timed(
            self.timeout_ms,
            sqlx::query("DELETE FROM resources WHERE id = $1 AND kind = $2 AND updated_at = $3")
                .bind(id)
                .bind(kind)
                .bind(expected)
                .execute(&mut *self.tx),
        )
        .await?;
        if result.rows_affected() == 0 {
            return Err(self.missed(kind, id).await?);
        }
        Ok(())
    }

    async fn insert_principal(&mut self, principal: &Principal) -> Result<(), StoreError> {
        let inserted = timed(
            self.timeout_ms,
            sqlx::query(
                "INSERT INTO principals (id, login, access, tenant_id, fingerprint, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(principal.id)
            .bind(&principal.login)
            .bind(principal.access.as_str())
            .bind(principal.tenant_id)
            .bind(&principal.fingerprint)
            .bind(principal.created_at)
            .bind(principal.updated_at)
            .execute(&mut *self.tx),
        )
        .await;
        match inserted {
            Err(StoreError::UniqueViolation(_)) => Err(StoreError::UniqueViolation("login".to_string())),
            other => other.map(|_| ()),
        }
    }

    async fn update_principal_access(
        &mut self,
        id: Uuid,
        access: Access,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = timed(
            self.timeout_ms,
            sqlx::query("UPDATE principals SET access = $1, updated_at = $2 WHERE id = $3")
                .bind(access.as_str())
                .bind(updated_at)
                .bind(id)
                .execute(&mut *self.tx),
        )
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn append_audit(&mut self, entry: &AuditEntry) -> Result<(), StoreError> {
        timed(
            self.timeout_ms,
            sqlx::query(
                "INSERT INTO audit_log (id, actor_id, action, target_type, target_id, context, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(entry.id)
            .bind(entry.actor_id)
            .bind(entry.action.as_str())
            .bind(&entry.target_type)
            .bind(entry.target_id)
            .bind(&entry.context)
            .bind(entry.created_at)
            .execute(&mut *self.tx),
        )
        .await?;
        Ok(())
    }

    /// A concurrent spender holding the row blocks this insert until it
    /// commits, after which the conflict leaves zero rows inserted
    async fn revoke_token(&mut self, jti: Uuid, expires_at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = timed(
            self.timeout_ms,
            sqlx::query("INSERT INTO revoked_tokens (jti, expires_at) VALUES ($1, $2) ON CONFLICT (jti) DO NOTHING")
                .bind(jti)
                .bind(expires_at)
                .execute(&mut *self.tx),
        )
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyRevoked);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let timeout_ms = self.timeout_ms;
        timed(timeout_ms, self.tx.commit()).await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let timeout_ms = self.timeout_ms;
        timed(timeout_ms, self.tx.rollback()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_splits_into_statements() {
        let statements: Vec<&str> = MIGRATION.split(';').map(str::trim).filter(|s| !s.is_empty()).collect();
        assert!(statements.iter().any(|s| s.starts_with("CREATE TABLE IF NOT EXISTS resources")));
        assert!(statements.iter().any(|s| s.contains("revoked_tokens")));
        assert!(statements.iter().all(|s| s.starts_with("CREATE")));
    }
}
