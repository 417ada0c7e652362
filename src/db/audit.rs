use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{AuditRecord, NewAuditRecord};

pub async fn insert(pool: &PgPool, record: &NewAuditRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO audit_records
             (tenant_id, actor_id, action, entity_type, entity_id, before, after, ip_address, user_agent, http_method)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(record.tenant_id)
    .bind(record.actor_id)
    .bind(&record.action)
    .bind(&record.entity_type)
    .bind(&record.entity_id)
    .bind(&record.before)
    .bind(&record.after)
    .bind(&record.ip_address)
    .bind(&record.user_agent)
    .bind(&record.http_method)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list(
    pool: &PgPool,
    tenant_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<AuditRecord>, sqlx::Error> {
    sqlx::query_as::<_, AuditRecord>(
        "SELECT * FROM audit_records WHERE tenant_id = $1
         ORDER BY created_at DESC LIMIT $2 OFFSET $3",
    )
    .bind(tenant_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}
