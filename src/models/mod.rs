pub mod audit_record;
pub mod credential;
pub mod delivery;
pub mod principal;
pub mod subscription;

pub use audit_record::{AuditRecord, NewAuditRecord};
pub use credential::{Credential, NewCredential};
pub use delivery::{AttemptOutcome, Delivery, DeliveryStatus, NewDelivery};
pub use principal::{AuthenticatedPrincipal, SCOPE_ALL};
pub use subscription::{NewSubscription, Subscription, WILDCARD_EVENT};
