use uuid::Uuid;

use crate::error::AppError;

/// The tenant a request acts for.
///
/// Built once per request by the authentication extractor and passed down
/// explicitly. Tenant-scoped writes read the tenant from here instead of
/// trusting ids supplied in request bodies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: Option<Uuid>,
}

impl TenantContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicit tenant for system-internal work that has no request behind it.
    pub fn system(tenant_id: Uuid) -> Self {
        Self {
            tenant_id: Some(tenant_id),
        }
    }

    pub fn current(&self) -> Option<Uuid> {
        self.tenant_id
    }

    pub fn tenant_id(&self) -> Result<Uuid, AppError> {
        self.tenant_id
            .ok_or_else(|| AppError::Unauthorized("No tenant resolved for this request".to_string()))
    }

    pub fn has_tenant(&self) -> bool {
        self.tenant_id.is_some()
    }

    pub fn set(&mut self, tenant_id: Uuid) {
        self.tenant_id = Some(tenant_id);
    }

    pub fn clear(&mut self) {
        self.tenant_id = None;
    }
}
