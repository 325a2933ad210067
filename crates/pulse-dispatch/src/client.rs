//! HTTP client for webhook delivery with a fixed per-request timeout.
//!
//! Handles request construction, response processing, and error
//! categorization. Every outbound callback carries the signature header,
//! the event-type header, a delivery ID, and a descriptive user agent.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::error::{DispatchError, Result};

/// Signature header carried by every delivery.
pub const SIGNATURE_HEADER: &str = "X-Pulse-Signature";

/// Event-type header carried by every delivery.
pub const EVENT_HEADER: &str = "X-Pulse-Event";

/// Delivery-ID header carried by every delivery.
pub const DELIVERY_HEADER: &str = "X-Pulse-Delivery";

/// Response bodies are truncated to this size before being recorded.
pub const MAX_RESPONSE_EXCERPT: usize = 1024;

/// Configuration for the webhook delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Hard timeout for each send; expiry is treated as a failed delivery.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::DELIVERY_TIMEOUT_SECONDS),
            user_agent: "Pulse-Webhooks/1.0".to_string(),
        }
    }
}

/// HTTP client optimized for webhook delivery.
///
/// Uses connection pooling and a fixed timeout to deliver callbacks to
/// many subscribers concurrently. Network-level failures are categorized
/// for the retry scheduler and the attempt audit trail.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

/// One outbound webhook request.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    /// Unique identifier for this delivery, echoed in a header.
    pub delivery_id: Uuid,
    /// Destination URL.
    pub url: String,
    /// Event name carried in the event-type header.
    pub event: String,
    /// Signed body bytes — exactly what the signature covers.
    pub body: Bytes,
    /// Signature value for the signature header.
    pub signature: String,
}

/// Response from a webhook delivery.
#[derive(Debug, Clone)]
pub struct WebhookResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body, truncated to `MAX_RESPONSE_EXCERPT`.
    pub body: String,
    /// Total duration of the request.
    pub duration: Duration,
    /// Whether the subscriber answered 2xx.
    pub is_success: bool,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Configuration` if the HTTP client cannot be
    /// built with the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                DispatchError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a new delivery client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Configuration` if the client cannot be built.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Delivers a signed webhook to its destination.
    ///
    /// A response of any status is an `Ok` — classification into
    /// success/failure happens on the caller's side from `is_success`.
    /// Errors are network-level failures:
    ///
    /// # Errors
    ///
    /// - `Timeout` when the fixed timeout expires
    /// - `Network` for connection failures and other transport errors
    pub async fn deliver(&self, request: WebhookRequest) -> Result<WebhookResponse> {
        let start = std::time::Instant::now();

        let span = info_span!(
            "webhook_delivery",
            delivery_id = %request.delivery_id,
            event = %request.event,
            url = %request.url,
        );

        async move {
            tracing::debug!("sending webhook");

            let response = self
                .client
                .post(&request.url)
                .header("content-type", "application/json")
                .header(SIGNATURE_HEADER, &request.signature)
                .header(EVENT_HEADER, &request.event)
                .header(DELIVERY_HEADER, request.delivery_id.to_string())
                .body(request.body.clone())
                .send()
                .await;

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    let duration = start.elapsed();
                    tracing::warn!(duration_ms = duration.as_millis(), "request failed: {e}");

                    if e.is_timeout() {
                        return Err(DispatchError::timeout(self.config.timeout.as_secs()));
                    }
                    if e.is_connect() {
                        return Err(DispatchError::network(format!("connection failed: {e}")));
                    }
                    return Err(DispatchError::network(e.to_string()));
                },
            };

            let duration = start.elapsed();
            let status_code = response.status().as_u16();
            let is_success = response.status().is_success();

            let body = match response.bytes().await {
                Ok(bytes) => truncate_excerpt(&bytes),
                Err(e) => {
                    tracing::warn!("failed to read response body: {e}");
                    format!("[failed to read response body: {e}]")
                },
            };

            tracing::debug!(
                status = status_code,
                duration_ms = duration.as_millis(),
                "received response"
            );

            Ok(WebhookResponse { status_code, body, duration, is_success })
        }
        .instrument(span)
        .await
    }
}

/// Truncates a response body to the recorded excerpt size.
fn truncate_excerpt(bytes: &[u8]) -> String {
    if bytes.len() > MAX_RESPONSE_EXCERPT {
        let suffix = "... (truncated)";
        let cut = MAX_RESPONSE_EXCERPT - suffix.len();
        let truncated = String::from_utf8_lossy(&bytes[..cut]);
        format!("{truncated}{suffix}")
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn test_request(url: String) -> WebhookRequest {
        WebhookRequest {
            delivery_id: Uuid::new_v4(),
            url,
            event: "task.completed".to_string(),
            body: Bytes::from("{\"event\":\"task.completed\"}"),
            signature: "sha256=deadbeef".to_string(),
        }
    }

    #[tokio::test]
    async fn successful_delivery() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/webhook"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .mount(&server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let response = client.deliver(test_request(format!("{}/webhook", server.uri()))).await;

        let response = response.unwrap();
        assert_eq!(response.status_code, 200);
        assert!(response.is_success);
        assert_eq!(response.body, "OK");
    }

    #[tokio::test]
    async fn non_2xx_is_a_response_not_an_error() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .mount(&server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let response =
            client.deliver(test_request(format!("{}/webhook", server.uri()))).await.unwrap();

        assert_eq!(response.status_code, 500);
        assert!(!response.is_success);
    }

    #[tokio::test]
    async fn delivery_headers_are_sent() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::header(SIGNATURE_HEADER, "sha256=deadbeef"))
            .and(matchers::header(EVENT_HEADER, "task.completed"))
            .and(matchers::header_exists(DELIVERY_HEADER))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        client.deliver(test_request(format!("{}/webhook", server.uri()))).await.unwrap();

        server.verify().await;
    }

    #[tokio::test]
    async fn connection_refused_maps_to_network_error() {
        // Port 9 (discard) is assumed closed.
        let client = DeliveryClient::with_defaults().unwrap();
        let result = client.deliver(test_request("http://127.0.0.1:9/webhook".to_string())).await;

        assert!(matches!(result, Err(DispatchError::Network { .. })));
    }

    #[tokio::test]
    async fn slow_response_maps_to_timeout_error() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let config = ClientConfig { timeout: Duration::from_millis(200), ..Default::default() };
        let client = DeliveryClient::new(config).unwrap();
        let result = client.deliver(test_request(format!("{}/webhook", server.uri()))).await;

        assert!(matches!(result, Err(DispatchError::Timeout { .. })));
    }

    #[tokio::test]
    async fn long_response_bodies_are_truncated() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(10_000)))
            .mount(&server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let response =
            client.deliver(test_request(format!("{}/webhook", server.uri()))).await.unwrap();

        assert!(response.body.len() <= MAX_RESPONSE_EXCERPT);
        assert!(response.body.ends_with("... (truncated)"));
    }

    #[test]
    fn truncate_excerpt_leaves_short_bodies_alone() {
        assert_eq!(truncate_excerpt(b"short"), "short");
    }
}
