use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

pub const EVENT_HEADER: &str = "x-hookline-event";
pub const DELIVERY_HEADER: &str = "x-hookline-delivery";
pub const TENANT_HEADER: &str = "x-hookline-tenant";

/// One outbound webhook call.
#[derive(Debug, Clone)]
pub struct OutboundRequest<'a> {
    pub url: &'a str,
    pub delivery_id: Uuid,
    pub tenant_id: Uuid,
    pub event_type: &'a str,
    /// Canonical JSON snapshot captured at publish time.
    pub payload: &'a str,
}

#[derive(Debug)]
pub enum TransportError {
    Timeout,
    Connect(String),
    Request(String),
    InvalidPayload(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Timeout => write!(f, "Request timed out"),
            TransportError::Connect(msg) => write!(f, "Connection failed: {msg}"),
            TransportError::Request(msg) => write!(f, "Request failed: {msg}"),
            TransportError::InvalidPayload(msg) => write!(f, "Invalid payload snapshot: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Sends a webhook and reports the HTTP status code. Success is decided by the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &OutboundRequest<'_>) -> Result<u16, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hookline/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| TransportError::Request(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &OutboundRequest<'_>) -> Result<u16, TransportError> {
        let payload: serde_json::Value = serde_json::from_str(request.payload)
            .map_err(|e| TransportError::InvalidPayload(e.to_string()))?;

        let body = json!({
            "delivery_id": request.delivery_id,
            "event_type": request.event_type,
            "tenant_id": request.tenant_id,
            "payload": payload,
        });

        let resp = self
            .client
            .post(request.url)
            .header(EVENT_HEADER, request.event_type)
            .header(DELIVERY_HEADER, request.delivery_id.to_string())
            .header(TENANT_HEADER, request.tenant_id.to_string())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else if e.is_connect() {
                    TransportError::Connect(e.to_string())
                } else {
                    TransportError::Request(e.to_string())
                }
            })?;

        Ok(resp.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn posts_snapshot_with_event_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header(EVENT_HEADER, "video.published"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let url = format!("{}/hook", server.uri());
        let request = OutboundRequest {
            url: &url,
            delivery_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            event_type: "video.published",
            payload: r#"{"video_id":42}"#,
        };

        assert_eq!(transport.send(&request).await.unwrap(), 204);

        let received = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(body["payload"]["video_id"], 42);
        assert_eq!(body["event_type"], "video.published");
        assert_eq!(body["tenant_id"], request.tenant_id.to_string());
    }

    #[tokio::test]
    async fn slow_receiver_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(Duration::from_millis(100)).unwrap();
        let url = server.uri();
        let request = OutboundRequest {
            url: &url,
            delivery_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            event_type: "video.published",
            payload: "{}",
        };

        assert!(matches!(
            transport.send(&request).await,
            Err(TransportError::Timeout)
        ));
    }
}
