use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::db::Store;
use crate::delivery::DeliverySignal;
use crate::error::AppError;
use crate::models::NewDelivery;
use crate::tenant::TenantContext;

/// Serialize once into the snapshot stored on every delivery of an event.
/// Object keys come out sorted, so equal payloads give equal snapshots.
pub fn canonical_snapshot<T: Serialize + ?Sized>(payload: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(payload)?;
    serde_json::to_string(&value)
}

/// Fans a domain event out to the tenant's matching subscriptions.
///
/// Only writes delivery rows; the HTTP calls happen later in the worker.
#[derive(Clone)]
pub struct EventPublisher {
    store: Arc<dyn Store>,
    signal: DeliverySignal,
}

impl EventPublisher {
    pub fn new(store: Arc<dyn Store>, signal: DeliverySignal) -> Self {
        Self { store, signal }
    }

    /// Publish for the request's tenant. Returns the number of deliveries created.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        tenant: &TenantContext,
        event_type: &str,
        payload: &T,
    ) -> Result<usize, AppError> {
        let tenant_id = tenant.tenant_id()?;
        self.publish_for_tenant(tenant_id, event_type, payload).await
    }

    /// Publish for an explicit tenant. Only for system-internal callers that
    /// have no request context; the caller vouches for `tenant_id`.
    pub async fn publish_for_tenant<T: Serialize + ?Sized>(
        &self,
        tenant_id: Uuid,
        event_type: &str,
        payload: &T,
    ) -> Result<usize, AppError> {
        let event_type = event_type.trim();
        if event_type.is_empty() {
            tracing::debug!(%tenant_id, "Ignoring publish with blank event type");
            return Ok(0);
        }

        let snapshot = canonical_snapshot(payload)
            .map_err(|e| AppError::BadRequest(format!("Payload is not serializable: {e}")))?;

        let subscriptions = self
            .store
            .matching_subscriptions(tenant_id, event_type)
            .await?;

        if subscriptions.is_empty() {
            tracing::debug!(%tenant_id, event_type, "No active subscriptions match event");
            return Ok(0);
        }

        let now = Utc::now();
        let batch: Vec<NewDelivery> = subscriptions
            .iter()
            .map(|sub| NewDelivery {
                tenant_id,
                subscription_id: sub.id,
                event_type: event_type.to_string(),
                payload: snapshot.clone(),
                next_attempt_at: now,
            })
            .collect();

        let created = self.store.insert_deliveries(batch).await?;

        tracing::info!(
            %tenant_id,
            event_type,
            deliveries = created.len(),
            "Event fanned out"
        );

        self.signal.notify();
        Ok(created.len())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{DeliveryStatus, NewSubscription};

    async fn subscribe(store: &MemoryStore, tenant_id: Uuid, events: &[&str]) -> Uuid {
        store
            .create_subscription(NewSubscription {
                tenant_id,
                target_url: "https://example.test/hook".to_string(),
                event_types: events.iter().map(|e| e.to_string()).collect(),
                description: None,
            })
            .await
            .unwrap()
            .id
    }

    fn publisher(store: &Arc<MemoryStore>) -> EventPublisher {
        EventPublisher::new(store.clone(), DeliverySignal::new())
    }

    #[test]
    fn snapshot_sorts_keys() {
        let a = canonical_snapshot(&json!({ "b": 1, "a": { "d": 2, "c": 3 } })).unwrap();
        assert_eq!(a, r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[tokio::test]
    async fn fans_out_to_active_matching_subscriptions_only() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        let other_tenant = Uuid::new_v4();
        subscribe(&store, tenant, &["video.published"]).await;
        subscribe(&store, tenant, &["video.published", "video.deleted"]).await;
        let inactive = subscribe(&store, tenant, &["video.published"]).await;
        store
            .set_subscription_active(tenant, inactive, false)
            .await
            .unwrap();
        subscribe(&store, tenant, &["video.deleted"]).await;
        subscribe(&store, other_tenant, &["video.published"]).await;

        let created = publisher(&store)
            .publish(
                &TenantContext::system(tenant),
                "video.published",
                &json!({ "video_id": 7 }),
            )
            .await
            .unwrap();
        assert_eq!(created, 2);

        let deliveries = store.list_deliveries(tenant, None, 50, 0).await.unwrap();
        assert_eq!(deliveries.len(), 2);
        assert!(deliveries.iter().all(|d| d.status == DeliveryStatus::Pending));
        assert!(deliveries.iter().all(|d| d.attempt_count == 0));
        assert_eq!(deliveries[0].payload, deliveries[1].payload);
        assert!(
            store
                .list_deliveries(other_tenant, None, 50, 0)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn wildcard_subscriptions_receive_everything() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        subscribe(&store, tenant, &["*"]).await;

        let created = publisher(&store)
            .publish_for_tenant(tenant, "comment.created", &json!({}))
            .await
            .unwrap();
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn blank_event_type_and_no_match_are_noops() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        subscribe(&store, tenant, &["video.published"]).await;
        let publisher = publisher(&store);

        assert_eq!(publisher.publish_for_tenant(tenant, "   ", &json!({})).await.unwrap(), 0);
        assert_eq!(
            publisher.publish_for_tenant(tenant, "user.created", &json!({})).await.unwrap(),
            0
        );
        assert!(store.list_deliveries(tenant, None, 50, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn snapshot_is_not_affected_by_later_changes() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        let sub = subscribe(&store, tenant, &["video.published"]).await;
        let mut payload = json!({ "title": "first cut" });

        publisher(&store)
            .publish_for_tenant(tenant, "video.published", &payload)
            .await
            .unwrap();
        payload["title"] = json!("director's cut");
        store.set_subscription_active(tenant, sub, false).await.unwrap();

        let deliveries = store.list_deliveries(tenant, None, 50, 0).await.unwrap();
        assert_eq!(deliveries[0].payload, r#"{"title":"first cut"}"#);
    }

    #[tokio::test]
    async fn missing_tenant_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let result = publisher(&store)
            .publish(&TenantContext::new(), "video.published", &json!({}))
            .await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn store_failures_reach_the_caller() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        subscribe(&store, tenant, &["video.published"]).await;
        store.set_read_only(true);

        let result = publisher(&store)
            .publish_for_tenant(tenant, "video.published", &json!({}))
            .await;
        assert!(matches!(result, Err(AppError::Store(_))));
    }

    #[tokio::test]
    async fn publish_signals_the_worker() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        subscribe(&store, tenant, &["video.published"]).await;
        let signal = DeliverySignal::new();
        let publisher = EventPublisher::new(store.clone(), signal.clone());

        publisher
            .publish_for_tenant(tenant, "video.published", &json!({}))
            .await
            .unwrap();

        // notify_one stores a permit, so this returns immediately
        tokio::time::timeout(std::time::Duration::from_secs(1), signal.notified())
            .await
            .unwrap();
    }
}
