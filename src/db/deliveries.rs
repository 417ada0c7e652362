use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{AttemptOutcome, Delivery, DeliveryStatus, NewDelivery};

/// Insert a fan-out batch in one transaction.
pub async fn insert_batch(pool: &PgPool, batch: &[NewDelivery]) -> Result<Vec<Delivery>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut created = Vec::with_capacity(batch.len());

    for new in batch {
        let delivery = sqlx::query_as::<_, Delivery>(
            "INSERT INTO deliveries (tenant_id, subscription_id, event_type, payload, next_attempt_at)
             VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(new.tenant_id)
        .bind(new.subscription_id)
        .bind(&new.event_type)
        .bind(&new.payload)
        .bind(new.next_attempt_at)
        .fetch_one(&mut *tx)
        .await?;
        created.push(delivery);
    }

    tx.commit().await?;
    Ok(created)
}

pub async fn list(
    pool: &PgPool,
    tenant_id: Uuid,
    status: Option<DeliveryStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Delivery>, sqlx::Error> {
    sqlx::query_as::<_, Delivery>(
        "SELECT * FROM deliveries
         WHERE tenant_id = $1 AND ($2::text IS NULL OR status = $2)
         ORDER BY created_at DESC LIMIT $3 OFFSET $4",
    )
    .bind(tenant_id)
    .bind(status.map(DeliveryStatus::as_str))
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn find_by_id(
    pool: &PgPool,
    id: Uuid,
    tenant_id: Uuid,
) -> Result<Option<Delivery>, sqlx::Error> {
    sqlx::query_as::<_, Delivery>("SELECT * FROM deliveries WHERE id = $1 AND tenant_id = $2")
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await
}

/// Due deliveries ranked per tenant so every tenant gets its oldest item
/// into the batch before any tenant gets its second.
pub async fn due(
    pool: &PgPool,
    now: DateTime<Utc>,
    per_tenant: i64,
    limit: i64,
) -> Result<Vec<Delivery>, sqlx::Error> {
    sqlx::query_as::<_, Delivery>(
        "SELECT * FROM (
             SELECT d.*,
                    ROW_NUMBER() OVER (PARTITION BY d.tenant_id ORDER BY d.created_at, d.id) AS tenant_rank
             FROM deliveries d
             WHERE d.status = 'pending' AND d.next_attempt_at <= $1
         ) ranked
         WHERE tenant_rank <= $2
         ORDER BY tenant_rank ASC, created_at ASC
         LIMIT $3",
    )
    .bind(now)
    .bind(per_tenant)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Conditional `pending -> delivering`. Exactly one concurrent caller gets a row back.
pub async fn claim(
    pool: &PgPool,
    id: Uuid,
    token: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<Delivery>, sqlx::Error> {
    sqlx::query_as::<_, Delivery>(
        "UPDATE deliveries
         SET status = 'delivering', claim_token = $2, claimed_at = $3
         WHERE id = $1 AND status = 'pending' AND next_attempt_at <= $3
         RETURNING *",
    )
    .bind(id)
    .bind(token)
    .bind(now)
    .fetch_optional(pool)
    .await
}

pub async fn finish(
    pool: &PgPool,
    id: Uuid,
    token: Uuid,
    outcome: &AttemptOutcome,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let status = outcome.status();
    let next_attempt_at = match outcome {
        AttemptOutcome::Retry { next_attempt_at, .. } => Some(*next_attempt_at),
        _ => None,
    };
    let completed_at = status.is_terminal().then_some(now);

    let result = sqlx::query(
        "UPDATE deliveries
         SET status = $3,
             attempt_count = $4,
             next_attempt_at = COALESCE($5, next_attempt_at),
             last_error = $6,
             last_status_code = $7,
             completed_at = $8,
             claim_token = NULL,
             claimed_at = NULL
         WHERE id = $1 AND status = 'delivering' AND claim_token = $2",
    )
    .bind(id)
    .bind(token)
    .bind(status)
    .bind(outcome.attempt_count())
    .bind(next_attempt_at)
    .bind(outcome.error())
    .bind(outcome.status_code())
    .bind(completed_at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn stale(
    pool: &PgPool,
    claimed_before: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Delivery>, sqlx::Error> {
    sqlx::query_as::<_, Delivery>(
        "SELECT * FROM deliveries
         WHERE status = 'delivering' AND claimed_at < $1
         ORDER BY claimed_at ASC
         LIMIT $2",
    )
    .bind(claimed_before)
    .bind(limit)
    .fetch_all(pool)
    .await
}
