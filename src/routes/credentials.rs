use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::auth::credential::normalize_scopes;
use crate::auth::{Authenticated, SCOPE_CREDENTIALS_WRITE};
use crate::error::AppError;
use crate::models::{Credential, SCOPE_ALL};
use crate::state::SharedState;

const DEFAULT_LIFETIME_DAYS: i64 = 365;

#[derive(Deserialize)]
pub struct IssueCredential {
    pub name: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Defaults to the caller's own subject. Naming another subject needs `*`.
    pub subject_id: Option<Uuid>,
}

/// The only response that ever carries the plaintext secret.
#[derive(Serialize)]
pub struct IssuedResponse {
    #[serde(flatten)]
    pub credential: Credential,
    pub secret: String,
}

pub async fn issue(
    auth: Authenticated,
    State(state): State<SharedState>,
    Json(req): Json<IssueCredential>,
) -> Result<(StatusCode, Json<IssuedResponse>), AppError> {
    auth.require_scope(SCOPE_CREDENTIALS_WRITE)?;

    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("name is required".to_string()));
    }

    let scopes = normalize_scopes(&req.scopes);
    if scopes.is_empty() {
        return Err(AppError::BadRequest(
            "At least one scope is required".to_string(),
        ));
    }
    if let Some(scope) = scopes.iter().find(|s| !auth.principal.has_scope(s)) {
        return Err(AppError::Forbidden(format!(
            "Cannot grant scope not held by the caller: {scope}"
        )));
    }

    let subject_id = match req.subject_id {
        Some(subject) if Some(subject) != auth.principal.subject_id => {
            if !auth.principal.has_scope(SCOPE_ALL) {
                return Err(AppError::Forbidden(
                    "Only full-scope keys may issue keys for another subject".to_string(),
                ));
            }
            Some(subject)
        }
        _ => auth.principal.subject_id,
    };

    let now = Utc::now();
    let expires_at = req
        .expires_at
        .unwrap_or(now + Duration::days(DEFAULT_LIFETIME_DAYS));
    if expires_at <= now {
        return Err(AppError::BadRequest(
            "expires_at must be in the future".to_string(),
        ));
    }

    let issued = state
        .verifier
        .issue(
            &auth.tenant,
            subject_id,
            name,
            &scopes,
            expires_at,
        )
        .await?;

    state.audit.record(
        Some(&auth.principal),
        &auth.tenant,
        &auth.meta,
        AuditEntry::new("credential.issued", "credential")
            .entity(issued.credential.id)
            .after(&issued.credential),
    );

    Ok((
        StatusCode::CREATED,
        Json(IssuedResponse {
            credential: issued.credential,
            secret: issued.secret,
        }),
    ))
}

pub async fn list(
    auth: Authenticated,
    State(state): State<SharedState>,
) -> Result<Json<Vec<Credential>>, AppError> {
    auth.require_scope(SCOPE_CREDENTIALS_WRITE)?;
    let credentials = state
        .store
        .list_credentials(auth.tenant.tenant_id()?)
        .await?;
    Ok(Json(credentials))
}

pub async fn revoke(
    auth: Authenticated,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    auth.require_scope(SCOPE_CREDENTIALS_WRITE)?;

    let revoked = state
        .verifier
        .revoke(&auth.tenant, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Credential not found".to_string()))?;

    state.audit.record(
        Some(&auth.principal),
        &auth.tenant,
        &auth.meta,
        AuditEntry::new("credential.revoked", "credential")
            .entity(revoked.id)
            .after(&revoked),
    );

    Ok(StatusCode::NO_CONTENT)
}
