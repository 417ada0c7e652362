use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::{Authorization, HeaderMapExt};

use crate::audit::RequestMeta;
use crate::error::AppError;
use crate::models::AuthenticatedPrincipal;
use crate::state::SharedState;
use crate::tenant::TenantContext;

pub const API_KEY_HEADER: &str = "x-api-key";

/// An API-key authenticated request: who is calling, for which tenant, from where.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub principal: AuthenticatedPrincipal,
    pub tenant: TenantContext,
    pub meta: RequestMeta,
}

impl Authenticated {
    pub fn require_scope(&self, scope: &str) -> Result<(), AppError> {
        self.principal.require_scope(scope)
    }
}

/// `Authorization: Bearer <key>` wins over `x-api-key`.
fn presented_secret(parts: &Parts) -> Option<String> {
    if let Some(Authorization(bearer)) = parts.headers.typed_get::<Authorization<Bearer>>() {
        return Some(bearer.token().to_string());
    }

    parts
        .headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

impl FromRequestParts<SharedState> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let secret = presented_secret(parts);
        let principal = state.verifier.authenticate(secret.as_deref()).await?;

        let mut tenant = TenantContext::new();
        tenant.set(principal.tenant_id);

        Ok(Authenticated {
            principal,
            tenant,
            meta: RequestMeta::from_parts(parts, &state.config.trusted_proxies),
        })
    }
}
