use std::sync::Arc;

use crate::audit::AuditRecorder;
use crate::auth::CredentialVerifier;
use crate::config::Config;
use crate::db::Store;
use crate::delivery::DeliverySignal;
use crate::publisher::EventPublisher;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Config,
    pub verifier: CredentialVerifier,
    pub publisher: EventPublisher,
    pub audit: AuditRecorder,
    pub signal: DeliverySignal,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Config, signal: DeliverySignal) -> Self {
        Self {
            verifier: CredentialVerifier::new(store.clone()),
            publisher: EventPublisher::new(store.clone(), signal.clone()),
            audit: AuditRecorder::new(store.clone()),
            store,
            config,
            signal,
        }
    }
}
