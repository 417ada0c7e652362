pub mod metadata;

use std::sync::Arc;

use serde_json::Value;

use crate::db::Store;
use crate::models::{AuthenticatedPrincipal, NewAuditRecord};
use crate::tenant::TenantContext;

pub use metadata::RequestMeta;

/// What happened, to which entity. Attribution comes from the principal and
/// tenant context at record time.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

impl AuditEntry {
    pub fn new(action: &str, entity_type: &str) -> Self {
        Self {
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: None,
            before: None,
            after: None,
        }
    }

    pub fn entity(mut self, id: impl ToString) -> Self {
        self.entity_id = Some(id.to_string());
        self
    }

    pub fn before<T: serde::Serialize>(mut self, value: &T) -> Self {
        self.before = serde_json::to_value(value).ok();
        self
    }

    pub fn after<T: serde::Serialize>(mut self, value: &T) -> Self {
        self.after = serde_json::to_value(value).ok();
        self
    }
}

/// Append-only, best-effort audit log.
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn Store>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Write the entry in the background. Never fails the caller: entries
    /// without a resolvable actor and tenant are dropped, and store errors
    /// are only logged.
    pub fn record(
        &self,
        principal: Option<&AuthenticatedPrincipal>,
        tenant: &TenantContext,
        meta: &RequestMeta,
        entry: AuditEntry,
    ) {
        let Some(record) = build_record(principal, tenant, meta, entry) else {
            return;
        };

        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.insert_audit_record(record.clone()).await {
                tracing::error!(
                    tenant_id = %record.tenant_id,
                    action = %record.action,
                    "Failed to write audit record: {e}"
                );
            }
        });
    }
}

fn build_record(
    principal: Option<&AuthenticatedPrincipal>,
    tenant: &TenantContext,
    meta: &RequestMeta,
    entry: AuditEntry,
) -> Option<NewAuditRecord> {
    let Some(principal) = principal else {
        tracing::debug!(action = %entry.action, "Skipping audit for unauthenticated caller");
        return None;
    };
    let tenant_id = tenant.current().unwrap_or(principal.tenant_id);
    let Some(actor_id) = principal.subject_id else {
        tracing::debug!(action = %entry.action, "Skipping audit without a resolvable actor");
        return None;
    };

    Some(NewAuditRecord {
        tenant_id,
        actor_id,
        action: entry.action,
        entity_type: entry.entity_type,
        entity_id: entry.entity_id,
        before: entry.before,
        after: entry.after,
        ip_address: meta.ip_address.clone(),
        user_agent: meta.user_agent.clone(),
        http_method: meta.http_method.clone(),
    })
}
