use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::{Store, StoreError, fair_batch};
use crate::models::{
    AttemptOutcome, AuditRecord, Credential, Delivery, DeliveryStatus, NewAuditRecord,
    NewCredential, NewDelivery, NewSubscription, Subscription,
};

/// Process-local store for development and tests. Not durable.
///
/// Conditional updates run under the map shard's write lock, which gives the
/// same single-winner guarantee as the SQL `UPDATE ... WHERE status = ...`.
#[derive(Default)]
pub struct MemoryStore {
    subscriptions: DashMap<Uuid, Subscription>,
    deliveries: DashMap<Uuid, Delivery>,
    credentials: DashMap<Uuid, Credential>,
    /// secret_hash -> credential id
    credential_hashes: DashMap<String, Uuid>,
    audit_records: DashMap<Uuid, AuditRecord>,
    unavailable: AtomicBool,
    read_only: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreError::Unavailable` until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make every write fail with `StoreError::Unavailable` while reads keep working.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Overwrite a delivery row directly. Test fixtures use this to stage
    /// states the worker would otherwise take time to reach.
    pub fn put_delivery(&self, delivery: Delivery) {
        self.deliveries.insert(delivery.id, delivery);
    }

    pub fn delivery(&self, id: Uuid) -> Option<Delivery> {
        self.deliveries.get(&id).map(|d| d.clone())
    }

    pub fn credential(&self, id: Uuid) -> Option<Credential> {
        self.credentials.get(&id).map(|c| c.clone())
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn check_write(&self) -> Result<(), StoreError> {
        self.check()?;
        if self.read_only.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store is read-only".to_string()))
        } else {
            Ok(())
        }
    }
}

fn page<T>(mut items: Vec<T>, limit: i64, offset: i64) -> Vec<T> {
    let offset = offset.max(0) as usize;
    let limit = limit.max(0) as usize;
    if offset >= items.len() {
        return Vec::new();
    }
    items.drain(..offset);
    items.truncate(limit);
    items
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_subscription(&self, new: NewSubscription) -> Result<Subscription, StoreError> {
        self.check_write()?;
        let subscription = Subscription {
            id: Uuid::now_v7(),
            tenant_id: new.tenant_id,
            target_url: new.target_url,
            event_types: new.event_types,
            active: true,
            description: new.description,
            created_at: Utc::now(),
        };
        self.subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(subscription)
    }

    async fn list_subscriptions(&self, tenant_id: Uuid) -> Result<Vec<Subscription>, StoreError> {
        self.check()?;
        let mut subs: Vec<Subscription> = self
            .subscriptions
            .iter()
            .filter(|s| s.tenant_id == tenant_id)
            .map(|s| s.clone())
            .collect();
        subs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(subs)
    }

    async fn find_subscription(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Subscription>, StoreError> {
        self.check()?;
        Ok(self
            .subscriptions
            .get(&id)
            .filter(|s| s.tenant_id == tenant_id)
            .map(|s| s.clone()))
    }

    async fn set_subscription_active(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        active: bool,
    ) -> Result<Option<Subscription>, StoreError> {
        self.check_write()?;
        match self.subscriptions.get_mut(&id) {
            Some(mut sub) if sub.tenant_id == tenant_id => {
                sub.active = active;
                Ok(Some(sub.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_subscription(&self, tenant_id: Uuid, id: Uuid) -> Result<bool, StoreError> {
        self.check_write()?;
        Ok(self
            .subscriptions
            .remove_if(&id, |_, s| s.tenant_id == tenant_id)
            .is_some())
    }

    async fn matching_subscriptions(
        &self,
        tenant_id: Uuid,
        event_type: &str,
    ) -> Result<Vec<Subscription>, StoreError> {
        self.check()?;
        let mut subs: Vec<Subscription> = self
            .subscriptions
            .iter()
            .filter(|s| s.tenant_id == tenant_id && s.active && s.matches(event_type))
            .map(|s| s.clone())
            .collect();
        subs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(subs)
    }

    async fn insert_deliveries(&self, batch: Vec<NewDelivery>) -> Result<Vec<Delivery>, StoreError> {
        self.check_write()?;
        let created_at = Utc::now();
        let created: Vec<Delivery> = batch
            .into_iter()
            .map(|new| Delivery {
                id: Uuid::now_v7(),
                tenant_id: new.tenant_id,
                subscription_id: new.subscription_id,
                event_type: new.event_type,
                payload: new.payload,
                status: DeliveryStatus::Pending,
                attempt_count: 0,
                next_attempt_at: new.next_attempt_at,
                last_error: None,
                last_status_code: None,
                claim_token: None,
                claimed_at: None,
                completed_at: None,
                created_at,
            })
            .collect();
        for delivery in &created {
            self.deliveries.insert(delivery.id, delivery.clone());
        }
        Ok(created)
    }

    async fn list_deliveries(
        &self,
        tenant_id: Uuid,
        status: Option<DeliveryStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Delivery>, StoreError> {
        self.check()?;
        let mut items: Vec<Delivery> = self
            .deliveries
            .iter()
            .filter(|d| d.tenant_id == tenant_id && status.is_none_or(|s| d.status == s))
            .map(|d| d.clone())
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(page(items, limit, offset))
    }

    async fn find_delivery(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Delivery>, StoreError> {
        self.check()?;
        Ok(self
            .deliveries
            .get(&id)
            .filter(|d| d.tenant_id == tenant_id)
            .map(|d| d.clone()))
    }

    async fn due_deliveries(
        &self,
        now: DateTime<Utc>,
        per_tenant: i64,
        limit: i64,
    ) -> Result<Vec<Delivery>, StoreError> {
        self.check()?;
        let due: Vec<Delivery> = self
            .deliveries
            .iter()
            .filter(|d| d.status == DeliveryStatus::Pending && d.next_attempt_at <= now)
            .map(|d| d.clone())
            .collect();
        Ok(fair_batch(
            due,
            per_tenant.max(0) as usize,
            limit.max(0) as usize,
        ))
    }

    async fn claim_delivery(
        &self,
        id: Uuid,
        token: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Delivery>, StoreError> {
        self.check_write()?;
        let Some(mut delivery) = self.deliveries.get_mut(&id) else {
            return Ok(None);
        };
        if delivery.status != DeliveryStatus::Pending || delivery.next_attempt_at > now {
            return Ok(None);
        }
        delivery.status = DeliveryStatus::Delivering;
        delivery.claim_token = Some(token);
        delivery.claimed_at = Some(now);
        Ok(Some(delivery.clone()))
    }

    async fn finish_attempt(
        &self,
        id: Uuid,
        token: Uuid,
        outcome: &AttemptOutcome,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check_write()?;
        let Some(mut delivery) = self.deliveries.get_mut(&id) else {
            return Ok(false);
        };
        if delivery.status != DeliveryStatus::Delivering || delivery.claim_token != Some(token) {
            return Ok(false);
        }
        let status = outcome.status();
        delivery.status = status;
        delivery.attempt_count = outcome.attempt_count();
        if let AttemptOutcome::Retry { next_attempt_at, .. } = outcome {
            delivery.next_attempt_at = *next_attempt_at;
        }
        delivery.last_error = outcome.error().map(str::to_string);
        delivery.last_status_code = outcome.status_code();
        delivery.completed_at = status.is_terminal().then_some(now);
        delivery.claim_token = None;
        delivery.claimed_at = None;
        Ok(true)
    }

    async fn stale_deliveries(
        &self,
        claimed_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Delivery>, StoreError> {
        self.check()?;
        let mut stale: Vec<Delivery> = self
            .deliveries
            .iter()
            .filter(|d| {
                d.status == DeliveryStatus::Delivering
                    && d.claimed_at.is_some_and(|at| at < claimed_before)
            })
            .map(|d| d.clone())
            .collect();
        stale.sort_by_key(|d| d.claimed_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn create_credential(&self, new: NewCredential) -> Result<Credential, StoreError> {
        self.check_write()?;
        if self.credential_hashes.contains_key(&new.secret_hash) {
            return Err(StoreError::Conflict(
                "credential hash already exists".to_string(),
            ));
        }
        let credential = Credential {
            id: Uuid::now_v7(),
            tenant_id: new.tenant_id,
            subject_id: new.subject_id,
            name: new.name,
            secret_hash: new.secret_hash,
            secret_prefix: new.secret_prefix,
            scopes: new.scopes,
            active: true,
            expires_at: new.expires_at,
            last_used_at: None,
            created_at: Utc::now(),
        };
        self.credential_hashes
            .insert(credential.secret_hash.clone(), credential.id);
        self.credentials.insert(credential.id, credential.clone());
        Ok(credential)
    }

    async fn find_active_credential(
        &self,
        secret_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Credential>, StoreError> {
        self.check()?;
        let Some(id) = self.credential_hashes.get(secret_hash).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self
            .credentials
            .get(&id)
            .filter(|c| c.active && c.expires_at > now)
            .map(|c| c.clone()))
    }

    async fn touch_credential(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check_write()?;
        let Some(mut credential) = self.credentials.get_mut(&id) else {
            return Ok(false);
        };
        if credential.last_used_at.is_some_and(|at| at >= stale_before) {
            return Ok(false);
        }
        credential.last_used_at = Some(now);
        Ok(true)
    }

    async fn list_credentials(&self, tenant_id: Uuid) -> Result<Vec<Credential>, StoreError> {
        self.check()?;
        let mut items: Vec<Credential> = self
            .credentials
            .iter()
            .filter(|c| c.tenant_id == tenant_id)
            .map(|c| c.clone())
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn revoke_credential(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Credential>, StoreError> {
        self.check_write()?;
        match self.credentials.get_mut(&id) {
            Some(mut credential) if credential.tenant_id == tenant_id => {
                credential.active = false;
                Ok(Some(credential.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn insert_audit_record(&self, record: NewAuditRecord) -> Result<(), StoreError> {
        self.check_write()?;
        let record = AuditRecord {
            id: Uuid::now_v7(),
            tenant_id: record.tenant_id,
            actor_id: record.actor_id,
            action: record.action,
            entity_type: record.entity_type,
            entity_id: record.entity_id,
            before: record.before,
            after: record.after,
            ip_address: record.ip_address,
            user_agent: record.user_agent,
            http_method: record.http_method,
            created_at: Utc::now(),
        };
        self.audit_records.insert(record.id, record);
        Ok(())
    }

    async fn list_audit_records(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        self.check()?;
        let mut items: Vec<AuditRecord> = self
            .audit_records
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .map(|r| r.clone())
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(page(items, limit, offset))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn new_delivery(tenant_id: Uuid) -> NewDelivery {
        NewDelivery {
            tenant_id,
            subscription_id: Uuid::new_v4(),
            event_type: "video.published".to_string(),
            payload: "{\"id\":1}".to_string(),
            next_attempt_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let created = store
            .insert_deliveries(vec![new_delivery(Uuid::new_v4())])
            .await
            .unwrap();
        let id = created[0].id;
        let now = Utc::now();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.claim_delivery(id, Uuid::new_v4(), now).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(store.delivery(id).unwrap().status, DeliveryStatus::Delivering);
    }

    #[tokio::test]
    async fn finish_requires_matching_claim_token() {
        let store = MemoryStore::new();
        let created = store
            .insert_deliveries(vec![new_delivery(Uuid::new_v4())])
            .await
            .unwrap();
        let id = created[0].id;
        let token = Uuid::new_v4();
        store.claim_delivery(id, token, Utc::now()).await.unwrap();

        let outcome = AttemptOutcome::Succeeded {
            attempt_count: 1,
            status_code: Some(200),
        };
        assert!(
            !store
                .finish_attempt(id, Uuid::new_v4(), &outcome, Utc::now())
                .await
                .unwrap()
        );
        assert!(store.finish_attempt(id, token, &outcome, Utc::now()).await.unwrap());
        assert_eq!(store.delivery(id).unwrap().status, DeliveryStatus::Succeeded);
        // terminal rows cannot be claimed again
        assert!(
            store
                .claim_delivery(id, Uuid::new_v4(), Utc::now())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn unavailable_store_rejects_batches_whole() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let tenant = Uuid::new_v4();

        let result = store
            .insert_deliveries(vec![new_delivery(tenant), new_delivery(tenant)])
            .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        store.set_unavailable(false);
        assert!(store.list_deliveries(tenant, None, 50, 0).await.unwrap().is_empty());
    }
}
