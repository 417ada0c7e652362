use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Credential {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub subject_id: Option<Uuid>,
    pub name: String,
    #[serde(skip_serializing)]
    pub secret_hash: String,
    pub secret_prefix: String,
    pub scopes: Vec<String>,
    pub active: bool,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCredential {
    pub tenant_id: Uuid,
    pub subject_id: Option<Uuid>,
    pub name: String,
    pub secret_hash: String,
    pub secret_prefix: String,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
}
