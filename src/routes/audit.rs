use axum::Json;
use axum::extract::{Query, State};

use crate::auth::{Authenticated, SCOPE_AUDIT_READ};
use crate::error::AppError;
use crate::models::AuditRecord;
use crate::routes::Page;
use crate::state::SharedState;

/// Newest first.
pub async fn list(
    auth: Authenticated,
    State(state): State<SharedState>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<AuditRecord>>, AppError> {
    auth.require_scope(SCOPE_AUDIT_READ)?;
    let (limit, offset) = page.bounds();
    let records = state
        .store
        .list_audit_records(auth.tenant.tenant_id()?, limit, offset)
        .await?;
    Ok(Json(records))
}
