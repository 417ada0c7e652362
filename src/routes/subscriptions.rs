use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::auth::{Authenticated, SCOPE_SUBSCRIPTIONS_READ, SCOPE_SUBSCRIPTIONS_WRITE};
use crate::error::AppError;
use crate::models::{NewSubscription, Subscription, WILDCARD_EVENT};
use crate::state::SharedState;

const MAX_EVENT_TYPE_LEN: usize = 128;

#[derive(Deserialize)]
pub struct CreateSubscription {
    pub target_url: String,
    pub event_types: Vec<String>,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct SetActive {
    pub active: bool,
}

pub async fn create(
    auth: Authenticated,
    State(state): State<SharedState>,
    Json(req): Json<CreateSubscription>,
) -> Result<(StatusCode, Json<Subscription>), AppError> {
    auth.require_scope(SCOPE_SUBSCRIPTIONS_WRITE)?;

    let target_url = validate_target_url(&req.target_url)?;
    let event_types = validate_event_types(&req.event_types)?;
    let description = req
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());

    let subscription = state
        .store
        .create_subscription(NewSubscription {
            tenant_id: auth.tenant.tenant_id()?,
            target_url,
            event_types,
            description,
        })
        .await?;

    state.audit.record(
        Some(&auth.principal),
        &auth.tenant,
        &auth.meta,
        AuditEntry::new("subscription.created", "subscription")
            .entity(subscription.id)
            .after(&subscription),
    );

    Ok((StatusCode::CREATED, Json(subscription)))
}

pub async fn list(
    auth: Authenticated,
    State(state): State<SharedState>,
) -> Result<Json<Vec<Subscription>>, AppError> {
    auth.require_scope(SCOPE_SUBSCRIPTIONS_READ)?;
    let subscriptions = state
        .store
        .list_subscriptions(auth.tenant.tenant_id()?)
        .await?;
    Ok(Json(subscriptions))
}

pub async fn get(
    auth: Authenticated,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Subscription>, AppError> {
    auth.require_scope(SCOPE_SUBSCRIPTIONS_READ)?;
    let subscription = state
        .store
        .find_subscription(auth.tenant.tenant_id()?, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Subscription not found".to_string()))?;
    Ok(Json(subscription))
}

pub async fn set_active(
    auth: Authenticated,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SetActive>,
) -> Result<Json<Subscription>, AppError> {
    auth.require_scope(SCOPE_SUBSCRIPTIONS_WRITE)?;
    let tenant_id = auth.tenant.tenant_id()?;

    let before = state
        .store
        .find_subscription(tenant_id, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Subscription not found".to_string()))?;

    let subscription = state
        .store
        .set_subscription_active(tenant_id, id, req.active)
        .await?
        .ok_or_else(|| AppError::NotFound("Subscription not found".to_string()))?;

    if before.active != subscription.active {
        let action = if subscription.active {
            "subscription.activated"
        } else {
            "subscription.deactivated"
        };
        state.audit.record(
            Some(&auth.principal),
            &auth.tenant,
            &auth.meta,
            AuditEntry::new(action, "subscription")
                .entity(subscription.id)
                .before(&before)
                .after(&subscription),
        );
    }

    Ok(Json(subscription))
}

pub async fn delete(
    auth: Authenticated,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    auth.require_scope(SCOPE_SUBSCRIPTIONS_WRITE)?;
    let tenant_id = auth.tenant.tenant_id()?;

    let before = state
        .store
        .find_subscription(tenant_id, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Subscription not found".to_string()))?;

    if !state.store.delete_subscription(tenant_id, id).await? {
        return Err(AppError::NotFound("Subscription not found".to_string()));
    }

    state.audit.record(
        Some(&auth.principal),
        &auth.tenant,
        &auth.meta,
        AuditEntry::new("subscription.deleted", "subscription")
            .entity(id)
            .before(&before),
    );

    Ok(StatusCode::NO_CONTENT)
}

fn validate_target_url(raw: &str) -> Result<String, AppError> {
    let url = reqwest::Url::parse(raw.trim())
        .map_err(|_| AppError::BadRequest("target_url must be a valid URL".to_string()))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url.to_string()),
        _ => Err(AppError::BadRequest(
            "target_url must be an http or https URL".to_string(),
        )),
    }
}

/// Trimmed, de-duplicated, non-empty. `*` is accepted as the wildcard.
pub(crate) fn validate_event_types(raw: &[String]) -> Result<Vec<String>, AppError> {
    let mut event_types: Vec<String> = Vec::new();
    for event_type in raw {
        let event_type = event_type.trim();
        if event_type.is_empty() {
            continue;
        }
        validate_event_type(event_type)?;
        if !event_types.iter().any(|e| e == event_type) {
            event_types.push(event_type.to_string());
        }
    }
    if event_types.is_empty() {
        return Err(AppError::BadRequest(
            "At least one event type is required".to_string(),
        ));
    }
    Ok(event_types)
}

pub(crate) fn validate_event_type(event_type: &str) -> Result<(), AppError> {
    if event_type == WILDCARD_EVENT {
        return Ok(());
    }
    if event_type.len() > MAX_EVENT_TYPE_LEN
        || !event_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ':'))
    {
        return Err(AppError::BadRequest(format!(
            "Invalid event type '{event_type}'"
        )));
    }
    Ok(())
}
