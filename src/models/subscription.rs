use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type that matches every published event.
pub const WILDCARD_EVENT: &str = "*";

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub target_url: String,
    pub event_types: Vec<String>,
    pub active: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn matches(&self, event_type: &str) -> bool {
        self.event_types
            .iter()
            .any(|e| e == event_type || e == WILDCARD_EVENT)
    }
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub tenant_id: Uuid,
    pub target_url: String,
    pub event_types: Vec<String>,
    pub description: Option<String>,
}
