use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivering,
    Succeeded,
    /// Kept for compatibility with stored rows; the worker never produces it.
    Failed,
    Abandoned,
}

impl DeliveryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Succeeded | DeliveryStatus::Abandoned)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivering => "delivering",
            DeliveryStatus::Succeeded => "succeeded",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Abandoned => "abandoned",
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "delivering" => Ok(DeliveryStatus::Delivering),
            "succeeded" => Ok(DeliveryStatus::Succeeded),
            "failed" => Ok(DeliveryStatus::Failed),
            "abandoned" => Ok(DeliveryStatus::Abandoned),
            other => Err(format!("Unknown delivery status: {other}")),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub subscription_id: Uuid,
    pub event_type: String,
    pub payload: String,
    pub status: DeliveryStatus,
    pub attempt_count: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub last_status_code: Option<i32>,
    #[serde(skip_serializing)]
    pub claim_token: Option<Uuid>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub tenant_id: Uuid,
    pub subscription_id: Uuid,
    pub event_type: String,
    pub payload: String,
    pub next_attempt_at: DateTime<Utc>,
}

/// Result of one attempt, applied to a claimed delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Succeeded {
        attempt_count: i32,
        status_code: Option<i32>,
    },
    Retry {
        attempt_count: i32,
        next_attempt_at: DateTime<Utc>,
        status_code: Option<i32>,
        error: String,
    },
    Abandoned {
        attempt_count: i32,
        status_code: Option<i32>,
        error: String,
    },
}

impl AttemptOutcome {
    pub fn status(&self) -> DeliveryStatus {
        match self {
            AttemptOutcome::Succeeded { .. } => DeliveryStatus::Succeeded,
            AttemptOutcome::Retry { .. } => DeliveryStatus::Pending,
            AttemptOutcome::Abandoned { .. } => DeliveryStatus::Abandoned,
        }
    }

    pub fn attempt_count(&self) -> i32 {
        match self {
            AttemptOutcome::Succeeded { attempt_count, .. }
            | AttemptOutcome::Retry { attempt_count, .. }
            | AttemptOutcome::Abandoned { attempt_count, .. } => *attempt_count,
        }
    }

    pub fn status_code(&self) -> Option<i32> {
        match self {
            AttemptOutcome::Succeeded { status_code, .. }
            | AttemptOutcome::Retry { status_code, .. }
            | AttemptOutcome::Abandoned { status_code, .. } => *status_code,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            AttemptOutcome::Succeeded { .. } => None,
            AttemptOutcome::Retry { error, .. } | AttemptOutcome::Abandoned { error, .. } => {
                Some(error)
            }
        }
    }
}
