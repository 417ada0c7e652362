use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{NewSubscription, Subscription, WILDCARD_EVENT};

pub async fn create(pool: &PgPool, new: &NewSubscription) -> Result<Subscription, sqlx::Error> {
    sqlx::query_as::<_, Subscription>(
        "INSERT INTO subscriptions (tenant_id, target_url, event_types, description)
         VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(new.tenant_id)
    .bind(&new.target_url)
    .bind(&new.event_types)
    .bind(&new.description)
    .fetch_one(pool)
    .await
}

pub async fn list_by_tenant(pool: &PgPool, tenant_id: Uuid) -> Result<Vec<Subscription>, sqlx::Error> {
    sqlx::query_as::<_, Subscription>(
        "SELECT * FROM subscriptions WHERE tenant_id = $1 ORDER BY created_at DESC",
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await
}

pub async fn find_by_id(
    pool: &PgPool,
    id: Uuid,
    tenant_id: Uuid,
) -> Result<Option<Subscription>, sqlx::Error> {
    sqlx::query_as::<_, Subscription>(
        "SELECT * FROM subscriptions WHERE id = $1 AND tenant_id = $2",
    )
    .bind(id)
    .bind(tenant_id)
    .fetch_optional(pool)
    .await
}

pub async fn set_active(
    pool: &PgPool,
    id: Uuid,
    tenant_id: Uuid,
    active: bool,
) -> Result<Option<Subscription>, sqlx::Error> {
    sqlx::query_as::<_, Subscription>(
        "UPDATE subscriptions SET active = $3
         WHERE id = $1 AND tenant_id = $2
         RETURNING *",
    )
    .bind(id)
    .bind(tenant_id)
    .bind(active)
    .fetch_optional(pool)
    .await
}

pub async fn delete(pool: &PgPool, id: Uuid, tenant_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM subscriptions WHERE id = $1 AND tenant_id = $2")
        .bind(id)
        .bind(tenant_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Active subscriptions listening for the event type directly or through the wildcard.
pub async fn find_matching(
    pool: &PgPool,
    tenant_id: Uuid,
    event_type: &str,
) -> Result<Vec<Subscription>, sqlx::Error> {
    sqlx::query_as::<_, Subscription>(
        "SELECT * FROM subscriptions
         WHERE tenant_id = $1
           AND active
           AND ($2 = ANY(event_types) OR $3 = ANY(event_types))
         ORDER BY created_at ASC",
    )
    .bind(tenant_id)
    .bind(event_type)
    .bind(WILDCARD_EVENT)
    .fetch_all(pool)
    .await
}
