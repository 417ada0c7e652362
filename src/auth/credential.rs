use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::db::Store;
use crate::error::AppError;
use crate::models::{AuthenticatedPrincipal, Credential, NewCredential, SCOPE_ALL};
use crate::tenant::TenantContext;

/// `last_used_at` is rewritten at most once per this many seconds per credential.
pub const LAST_USED_WRITE_INTERVAL_SECS: i64 = 5 * 60;

const SECRET_PREFIX: &str = "hk_";
const DISPLAY_PREFIX_LEN: usize = 8;
const BOOTSTRAP_LIFETIME_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// No credential, or only whitespace.
    Missing,
    /// Unknown, expired and revoked credentials are indistinguishable.
    Invalid,
    /// The credential store could not be queried.
    Unavailable,
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthFailure::Missing => write!(f, "missing"),
            AuthFailure::Invalid => write!(f, "invalid"),
            AuthFailure::Unavailable => write!(f, "unavailable"),
        }
    }
}

impl From<AuthFailure> for AppError {
    fn from(failure: AuthFailure) -> Self {
        match failure {
            AuthFailure::Missing => AppError::Unauthorized("Missing API key".to_string()),
            AuthFailure::Invalid => AppError::Unauthorized("Invalid API key".to_string()),
            AuthFailure::Unavailable => {
                AppError::Internal("Credential store unavailable".to_string())
            }
        }
    }
}

/// A freshly issued credential. `secret` is never stored and cannot be shown again.
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub credential: Credential,
    pub secret: String,
}

/// SHA-256 of the secret, hex encoded. This is the only form that is persisted.
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

pub fn generate_secret() -> String {
    let bytes: [u8; 32] = rand::random();
    format!("{SECRET_PREFIX}{}", hex::encode(bytes))
}

/// Trim, drop blanks and duplicates.
pub fn normalize_scopes<I, S>(scopes: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for scope in scopes {
        let scope = scope.as_ref().trim();
        if !scope.is_empty() && !out.iter().any(|s| s == scope) {
            out.push(scope.to_string());
        }
    }
    out
}

#[derive(Clone)]
pub struct CredentialVerifier {
    store: Arc<dyn Store>,
}

impl CredentialVerifier {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn authenticate(
        &self,
        presented: Option<&str>,
    ) -> Result<AuthenticatedPrincipal, AuthFailure> {
        self.authenticate_at(presented, Utc::now()).await
    }

    pub async fn authenticate_at(
        &self,
        presented: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<AuthenticatedPrincipal, AuthFailure> {
        let secret = presented
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(AuthFailure::Missing)?;

        let credential = match self
            .store
            .find_active_credential(&hash_secret(secret), now)
            .await
        {
            Ok(Some(credential)) => credential,
            Ok(None) => return Err(AuthFailure::Invalid),
            Err(e) => {
                tracing::error!("Credential lookup failed: {e}");
                return Err(AuthFailure::Unavailable);
            }
        };

        self.record_use(&credential, now).await;

        Ok(AuthenticatedPrincipal {
            subject_id: credential.subject_id,
            tenant_id: credential.tenant_id,
            credential_id: Some(credential.id),
            scopes: normalize_scopes(&credential.scopes),
        })
    }

    /// Throttled `last_used_at` bookkeeping. Errors are logged, never returned.
    async fn record_use(&self, credential: &Credential, now: DateTime<Utc>) {
        let stale_before = now - Duration::seconds(LAST_USED_WRITE_INTERVAL_SECS);
        if credential
            .last_used_at
            .is_some_and(|at| at >= stale_before)
        {
            return;
        }

        if let Err(e) = self
            .store
            .touch_credential(credential.id, now, stale_before)
            .await
        {
            tracing::warn!(
                credential_id = %credential.id,
                "Failed to update credential last_used_at: {e}"
            );
        }
    }

    pub async fn issue(
        &self,
        tenant: &TenantContext,
        subject_id: Option<Uuid>,
        name: &str,
        scopes: &[String],
        expires_at: DateTime<Utc>,
    ) -> Result<IssuedCredential, AppError> {
        let tenant_id = tenant.tenant_id()?;
        let secret = generate_secret();

        let credential = self
            .store
            .create_credential(NewCredential {
                tenant_id,
                subject_id,
                name: name.trim().to_string(),
                secret_hash: hash_secret(&secret),
                secret_prefix: secret.chars().take(DISPLAY_PREFIX_LEN).collect(),
                scopes: normalize_scopes(scopes),
                expires_at,
            })
            .await?;

        tracing::info!(
            credential_id = %credential.id,
            tenant_id = %tenant_id,
            "Issued API credential"
        );

        Ok(IssuedCredential { credential, secret })
    }

    /// Issue a full-scope key for a tenant that has no credentials at all.
    /// Returns `None` once the tenant has any credential, active or not.
    pub async fn bootstrap(&self, tenant_id: Uuid) -> Result<Option<IssuedCredential>, AppError> {
        if !self.store.list_credentials(tenant_id).await?.is_empty() {
            return Ok(None);
        }

        let issued = self
            .issue(
                &TenantContext::system(tenant_id),
                Some(Uuid::new_v4()),
                "bootstrap",
                &[SCOPE_ALL.to_string()],
                Utc::now() + Duration::days(BOOTSTRAP_LIFETIME_DAYS),
            )
            .await?;
        Ok(Some(issued))
    }

    pub async fn revoke(
        &self,
        tenant: &TenantContext,
        id: Uuid,
    ) -> Result<Option<Credential>, AppError> {
        let tenant_id = tenant.tenant_id()?;
        Ok(self.store.revoke_credential(tenant_id, id).await?)
    }
}
