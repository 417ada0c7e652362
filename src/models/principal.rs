use uuid::Uuid;

use crate::error::AppError;

/// Scope granting every other scope.
pub const SCOPE_ALL: &str = "*";

/// Identity derived from a verified credential. Lives for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedPrincipal {
    pub subject_id: Option<Uuid>,
    pub tenant_id: Uuid,
    pub credential_id: Option<Uuid>,
    pub scopes: Vec<String>,
}

impl AuthenticatedPrincipal {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope || s == SCOPE_ALL)
    }

    pub fn require_scope(&self, scope: &str) -> Result<(), AppError> {
        if self.has_scope(scope) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!("Missing required scope: {scope}")))
        }
    }
}
