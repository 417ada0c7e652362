use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::audit::AuditEntry;
use crate::auth::{Authenticated, SCOPE_EVENTS_PUBLISH};
use crate::error::AppError;
use crate::models::WILDCARD_EVENT;
use crate::routes::subscriptions::validate_event_type;
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct PublishEvent {
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Serialize)]
pub struct Published {
    pub deliveries: usize,
}

pub async fn publish(
    auth: Authenticated,
    State(state): State<SharedState>,
    Json(req): Json<PublishEvent>,
) -> Result<(StatusCode, Json<Published>), AppError> {
    auth.require_scope(SCOPE_EVENTS_PUBLISH)?;

    let event_type = req.event_type.trim();
    if event_type.is_empty() {
        return Err(AppError::BadRequest("event_type is required".to_string()));
    }
    if event_type == WILDCARD_EVENT {
        return Err(AppError::BadRequest(
            "The wildcard is only valid in subscriptions".to_string(),
        ));
    }
    validate_event_type(event_type)?;

    let deliveries = state
        .publisher
        .publish(&auth.tenant, event_type, &req.payload)
        .await?;

    state.audit.record(
        Some(&auth.principal),
        &auth.tenant,
        &auth.meta,
        AuditEntry::new("event.published", "event")
            .after(&json!({ "event_type": event_type, "deliveries": deliveries })),
    );

    Ok((StatusCode::ACCEPTED, Json(Published { deliveries })))
}
