use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Credential, NewCredential};

pub async fn create(pool: &PgPool, new: &NewCredential) -> Result<Credential, sqlx::Error> {
    sqlx::query_as::<_, Credential>(
        "INSERT INTO credentials (tenant_id, subject_id, name, secret_hash, secret_prefix, scopes, expires_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
    )
    .bind(new.tenant_id)
    .bind(new.subject_id)
    .bind(&new.name)
    .bind(&new.secret_hash)
    .bind(&new.secret_prefix)
    .bind(&new.scopes)
    .bind(new.expires_at)
    .fetch_one(pool)
    .await
}

/// Indexed equality lookup on the hash column.
pub async fn find_active_by_hash(
    pool: &PgPool,
    secret_hash: &str,
    now: DateTime<Utc>,
) -> Result<Option<Credential>, sqlx::Error> {
    sqlx::query_as::<_, Credential>(
        "SELECT * FROM credentials
         WHERE secret_hash = $1 AND active AND expires_at > $2",
    )
    .bind(secret_hash)
    .bind(now)
    .fetch_optional(pool)
    .await
}

pub async fn touch(
    pool: &PgPool,
    id: Uuid,
    now: DateTime<Utc>,
    stale_before: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE credentials SET last_used_at = $2
         WHERE id = $1 AND (last_used_at IS NULL OR last_used_at < $3)",
    )
    .bind(id)
    .bind(now)
    .bind(stale_before)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_by_tenant(pool: &PgPool, tenant_id: Uuid) -> Result<Vec<Credential>, sqlx::Error> {
    sqlx::query_as::<_, Credential>(
        "SELECT * FROM credentials WHERE tenant_id = $1 ORDER BY created_at DESC",
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await
}

pub async fn revoke(
    pool: &PgPool,
    id: Uuid,
    tenant_id: Uuid,
) -> Result<Option<Credential>, sqlx::Error> {
    sqlx::query_as::<_, Credential>(
        "UPDATE credentials SET active = false
         WHERE id = $1 AND tenant_id = $2
         RETURNING *",
    )
    .bind(id)
    .bind(tenant_id)
    .fetch_optional(pool)
    .await
}
