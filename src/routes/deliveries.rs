use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{Authenticated, SCOPE_DELIVERIES_READ};
use crate::error::AppError;
use crate::models::{Delivery, DeliveryStatus};
use crate::routes::Page;
use crate::state::SharedState;

#[derive(Debug, Default, Deserialize)]
pub struct DeliveryQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list(
    auth: Authenticated,
    State(state): State<SharedState>,
    Query(query): Query<DeliveryQuery>,
) -> Result<Json<Vec<Delivery>>, AppError> {
    auth.require_scope(SCOPE_DELIVERIES_READ)?;

    let status = query
        .status
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<DeliveryStatus>()
                .map_err(|_| AppError::BadRequest(format!("Unknown delivery status '{s}'")))
        })
        .transpose()?;

    let (limit, offset) = Page {
        limit: query.limit,
        offset: query.offset,
    }
    .bounds();

    let deliveries = state
        .store
        .list_deliveries(auth.tenant.tenant_id()?, status, limit, offset)
        .await?;
    Ok(Json(deliveries))
}

pub async fn get(
    auth: Authenticated,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    auth.require_scope(SCOPE_DELIVERIES_READ)?;
    let delivery = state
        .store
        .find_delivery(auth.tenant.tenant_id()?, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Delivery not found".to_string()))?;
    Ok(Json(delivery))
}
