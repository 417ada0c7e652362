pub mod audit;
pub mod credentials;
pub mod deliveries;
pub mod memory;
pub mod subscriptions;

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    AttemptOutcome, AuditRecord, Credential, Delivery, DeliveryStatus, NewAuditRecord,
    NewCredential, NewDelivery, NewSubscription, Subscription,
};

pub use memory::MemoryStore;

#[derive(Debug)]
pub enum StoreError {
    Database(sqlx::Error),
    Conflict(String),
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(err) => write!(f, "Database error: {err}"),
            StoreError::Conflict(msg) => write!(f, "Conflict: {msg}"),
            StoreError::Unavailable(msg) => write!(f, "Store unavailable: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err)
    }
}

/// Durable storage for subscriptions, deliveries, credentials and audit records.
///
/// Every tenant-owned lookup takes the tenant id. The delivery worker's
/// selection and claim methods are the only unscoped ones.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_subscription(&self, new: NewSubscription) -> Result<Subscription, StoreError>;

    async fn list_subscriptions(&self, tenant_id: Uuid) -> Result<Vec<Subscription>, StoreError>;

    async fn find_subscription(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Subscription>, StoreError>;

    async fn set_subscription_active(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        active: bool,
    ) -> Result<Option<Subscription>, StoreError>;

    async fn delete_subscription(&self, tenant_id: Uuid, id: Uuid) -> Result<bool, StoreError>;

    /// Active subscriptions of the tenant listening for `event_type` or the wildcard.
    async fn matching_subscriptions(
        &self,
        tenant_id: Uuid,
        event_type: &str,
    ) -> Result<Vec<Subscription>, StoreError>;

    /// Insert all deliveries or none.
    async fn insert_deliveries(&self, batch: Vec<NewDelivery>) -> Result<Vec<Delivery>, StoreError>;

    async fn list_deliveries(
        &self,
        tenant_id: Uuid,
        status: Option<DeliveryStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Delivery>, StoreError>;

    async fn find_delivery(&self, tenant_id: Uuid, id: Uuid)
    -> Result<Option<Delivery>, StoreError>;

    /// Due pending deliveries, oldest first per tenant, at most `per_tenant`
    /// per tenant, interleaved across tenants and capped at `limit`.
    async fn due_deliveries(
        &self,
        now: DateTime<Utc>,
        per_tenant: i64,
        limit: i64,
    ) -> Result<Vec<Delivery>, StoreError>;

    /// Move a due delivery from `pending` to `delivering` under `token`.
    /// Returns `None` when another claim won or the delivery is no longer due.
    async fn claim_delivery(
        &self,
        id: Uuid,
        token: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Delivery>, StoreError>;

    /// Apply an attempt outcome. Only succeeds while the delivery is still
    /// `delivering` under the same claim token.
    async fn finish_attempt(
        &self,
        id: Uuid,
        token: Uuid,
        outcome: &AttemptOutcome,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Up to `limit` deliveries held in `delivering` since before
    /// `claimed_before`, oldest claim first.
    async fn stale_deliveries(
        &self,
        claimed_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Delivery>, StoreError>;

    async fn create_credential(&self, new: NewCredential) -> Result<Credential, StoreError>;

    /// Exact lookup on the secret hash, restricted to active, unexpired credentials.
    async fn find_active_credential(
        &self,
        secret_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Credential>, StoreError>;

    /// Set `last_used_at = now` unless it was already set at or after `stale_before`.
    async fn touch_credential(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn list_credentials(&self, tenant_id: Uuid) -> Result<Vec<Credential>, StoreError>;

    async fn revoke_credential(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Credential>, StoreError>;

    async fn insert_audit_record(&self, record: NewAuditRecord) -> Result<(), StoreError>;

    async fn list_audit_records(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditRecord>, StoreError>;
}

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_subscription(&self, new: NewSubscription) -> Result<Subscription, StoreError> {
        Ok(subscriptions::create(&self.pool, &new).await?)
    }

    async fn list_subscriptions(&self, tenant_id: Uuid) -> Result<Vec<Subscription>, StoreError> {
        Ok(subscriptions::list_by_tenant(&self.pool, tenant_id).await?)
    }

    async fn find_subscription(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Subscription>, StoreError> {
        Ok(subscriptions::find_by_id(&self.pool, id, tenant_id).await?)
    }

    async fn set_subscription_active(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        active: bool,
    ) -> Result<Option<Subscription>, StoreError> {
        Ok(subscriptions::set_active(&self.pool, id, tenant_id, active).await?)
    }

    async fn delete_subscription(&self, tenant_id: Uuid, id: Uuid) -> Result<bool, StoreError> {
        Ok(subscriptions::delete(&self.pool, id, tenant_id).await?)
    }

    async fn matching_subscriptions(
        &self,
        tenant_id: Uuid,
        event_type: &str,
    ) -> Result<Vec<Subscription>, StoreError> {
        Ok(subscriptions::find_matching(&self.pool, tenant_id, event_type).await?)
    }

    async fn insert_deliveries(&self, batch: Vec<NewDelivery>) -> Result<Vec<Delivery>, StoreError> {
        Ok(deliveries::insert_batch(&self.pool, &batch).await?)
    }

    async fn list_deliveries(
        &self,
        tenant_id: Uuid,
        status: Option<DeliveryStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Delivery>, StoreError> {
        Ok(deliveries::list(&self.pool, tenant_id, status, limit, offset).await?)
    }

    async fn find_delivery(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Delivery>, StoreError> {
        Ok(deliveries::find_by_id(&self.pool, id, tenant_id).await?)
    }

    async fn due_deliveries(
        &self,
        now: DateTime<Utc>,
        per_tenant: i64,
        limit: i64,
    ) -> Result<Vec<Delivery>, StoreError> {
        Ok(deliveries::due(&self.pool, now, per_tenant, limit).await?)
    }

    async fn claim_delivery(
        &self,
        id: Uuid,
        token: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Delivery>, StoreError> {
        Ok(deliveries::claim(&self.pool, id, token, now).await?)
    }

    async fn finish_attempt(
        &self,
        id: Uuid,
        token: Uuid,
        outcome: &AttemptOutcome,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(deliveries::finish(&self.pool, id, token, outcome, now).await?)
    }

    async fn stale_deliveries(
        &self,
        claimed_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Delivery>, StoreError> {
        Ok(deliveries::stale(&self.pool, claimed_before, limit).await?)
    }

    async fn create_credential(&self, new: NewCredential) -> Result<Credential, StoreError> {
        Ok(credentials::create(&self.pool, &new).await?)
    }

    async fn find_active_credential(
        &self,
        secret_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Credential>, StoreError> {
        Ok(credentials::find_active_by_hash(&self.pool, secret_hash, now).await?)
    }

    async fn touch_credential(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(credentials::touch(&self.pool, id, now, stale_before).await?)
    }

    async fn list_credentials(&self, tenant_id: Uuid) -> Result<Vec<Credential>, StoreError> {
        Ok(credentials::list_by_tenant(&self.pool, tenant_id).await?)
    }

    async fn revoke_credential(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Credential>, StoreError> {
        Ok(credentials::revoke(&self.pool, id, tenant_id).await?)
    }

    async fn insert_audit_record(&self, record: NewAuditRecord) -> Result<(), StoreError> {
        Ok(audit::insert(&self.pool, &record).await?)
    }

    async fn list_audit_records(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        Ok(audit::list(&self.pool, tenant_id, limit, offset).await?)
    }
}

/// Order due deliveries for one worker run: oldest first within a tenant,
/// at most `per_tenant` per tenant, then round-robin across tenants so one
/// tenant's backlog cannot fill the batch.
pub fn fair_batch(mut due: Vec<Delivery>, per_tenant: usize, limit: usize) -> Vec<Delivery> {
    due.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    let mut tenant_order: Vec<Uuid> = Vec::new();
    let mut queues: HashMap<Uuid, VecDeque<Delivery>> = HashMap::new();
    for delivery in due {
        let queue = queues.entry(delivery.tenant_id).or_insert_with(|| {
            tenant_order.push(delivery.tenant_id);
            VecDeque::new()
        });
        if queue.len() < per_tenant {
            queue.push_back(delivery);
        }
    }

    let mut batch = Vec::with_capacity(limit);
    while batch.len() < limit {
        let mut progressed = false;
        for tenant_id in &tenant_order {
            if batch.len() >= limit {
                break;
            }
            if let Some(delivery) = queues.get_mut(tenant_id).and_then(|q| q.pop_front()) {
                batch.push(delivery);
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    batch
}
