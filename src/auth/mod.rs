pub mod credential;
pub mod extractor;

pub use credential::{AuthFailure, CredentialVerifier, IssuedCredential};
pub use extractor::Authenticated;

pub const SCOPE_SUBSCRIPTIONS_READ: &str = "subscriptions:read";
pub const SCOPE_SUBSCRIPTIONS_WRITE: &str = "subscriptions:write";
pub const SCOPE_EVENTS_PUBLISH: &str = "events:publish";
pub const SCOPE_DELIVERIES_READ: &str = "deliveries:read";
pub const SCOPE_CREDENTIALS_WRITE: &str = "credentials:write";
pub const SCOPE_AUDIT_READ: &str = "audit:read";
