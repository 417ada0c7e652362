pub mod backoff;
pub mod transport;

use std::sync::Arc;

use tokio::sync::Notify;

pub use backoff::Backoff;
pub use transport::{HttpTransport, OutboundRequest, Transport, TransportError};

/// "Run soon" hint from the publisher to the delivery workers.
///
/// A missed signal only delays delivery until the next poll tick.
#[derive(Clone, Default)]
pub struct DeliverySignal {
    notify: Arc<Notify>,
}

impl DeliverySignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.notify.notify_one();
    }

    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}
