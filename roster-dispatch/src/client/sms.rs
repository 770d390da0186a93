//! SMS gateway endpoint
//!
//! `POST {base_url}/sms/send` with `{"from", "to", "message"}`; the gateway
//! answers `{"status": "sent", "id": ..}` or
//! `{"status": "failed", "code": .., "reason": ..}`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ChannelClient, ChannelError, EndpointConfig, SendReceipt, http::HttpEndpoint};
use crate::{Channel, error::SystemError};

const SEND_PATH: &str = "sms/send";

#[derive(Debug, Serialize)]
struct SmsRequest<'a> {
    from: &'a str,
    to: &'a str,
    message: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SmsStatus {
    Sent,
    Queued,
    Failed,
}

#[derive(Debug, Deserialize)]
struct SmsResponse {
    status: SmsStatus,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// Client for the fallback channel
#[derive(Debug, Clone)]
pub struct SmsClient {
    endpoint: HttpEndpoint,
}

impl SmsClient {
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(config: EndpointConfig) -> Result<Self, SystemError> {
        Ok(Self {
            endpoint: HttpEndpoint::new(Channel::Sms, config)?,
        })
    }
}

#[async_trait]
impl ChannelClient for SmsClient {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(
        &self,
        recipient_address: &str,
        body: &str,
    ) -> Result<SendReceipt, ChannelError> {
        let request = SmsRequest {
            from: &self.endpoint.config().sender,
            to: recipient_address,
            message: body,
        };

        let response: SmsResponse = self.endpoint.post_json(SEND_PATH, &request).await?;

        match response.status {
            SmsStatus::Sent | SmsStatus::Queued => Ok(SendReceipt {
                channel: Channel::Sms,
                message_id: response
                    .id
                    .ok_or_else(|| ChannelError::Decode("accepted without id".to_string()))?,
            }),
            SmsStatus::Failed => Err(ChannelError::Rejected {
                code: response.code.unwrap_or_else(|| "UNKNOWN".to_string()),
                message: response.reason.unwrap_or_default(),
            }),
        }
    }

    async fn is_available(&self) -> bool {
        self.endpoint.is_available().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use mockito::Matcher;
    use serde_json::json;

    use super::*;
    use crate::error::DispatchError;

    fn config(server: &mockito::ServerGuard) -> EndpointConfig {
        EndpointConfig {
            base_url: server.url(),
            username: "roster".to_string(),
            password: "hunter2".to_string(),
            sender: "CLUB".to_string(),
            ..EndpointConfig::default()
        }
    }

    #[tokio::test]
    async fn test_send_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/sms/send")
            .match_header("authorization", Matcher::Regex("^Basic ".to_string()))
            .match_body(Matcher::Json(json!({
                "from": "CLUB",
                "to": "+447700900123",
                "message": "hi",
            })))
            .with_status(200)
            .with_body(r#"{"status": "sent", "id": "sms-7"}"#)
            .create_async()
            .await;

        let receipt = SmsClient::new(config(&server))
            .unwrap()
            .send("+447700900123", "hi")
            .await
            .unwrap();

        assert_eq!(receipt.message_id, "sms-7");
        assert_eq!(receipt.channel, Channel::Sms);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_gateway_failure_is_permanent() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/sms/send")
            .with_status(200)
            .with_body(r#"{"status": "failed", "code": "INVALID_NUMBER", "reason": "unreachable"}"#)
            .create_async()
            .await;

        let err = SmsClient::new(config(&server))
            .unwrap()
            .send("+447700900123", "hi")
            .await
            .unwrap_err();

        let err = DispatchError::from(err);
        assert!(err.is_permanent());
        assert_eq!(err.code(), "REJECTED");
    }

    #[tokio::test]
    async fn test_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/sms/send")
            .with_status(401)
            .with_body("bad credentials")
            .create_async()
            .await;

        let err = SmsClient::new(config(&server))
            .unwrap()
            .send("+447700900123", "hi")
            .await
            .unwrap_err();

        assert_eq!(DispatchError::from(err).code(), "AUTH_FAILED");
    }

    #[tokio::test]
    async fn test_garbage_response_is_decode_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/sms/send")
            .with_status(200)
            .with_body("<html>oops</html>")
            .create_async()
            .await;

        let err = SmsClient::new(config(&server))
            .unwrap()
            .send("+447700900123", "hi")
            .await
            .unwrap_err();

        assert!(matches!(err, ChannelError::Decode(_)));
    }

    #[tokio::test]
    async fn test_health_probe() {
        let mut server = mockito::Server::new_async().await;
        let healthy = server
            .mock("GET", "/health")
            .with_status(200)
            .create_async()
            .await;

        let client = SmsClient::new(EndpointConfig {
            health_path: Some("/health".to_string()),
            ..config(&server)
        })
        .unwrap();
        assert!(client.is_available().await);
        healthy.assert_async().await;

        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(503)
            .create_async()
            .await;

        let client = SmsClient::new(EndpointConfig {
            health_path: Some("/health".to_string()),
            ..config(&server)
        })
        .unwrap();
        assert!(!client.is_available().await);
    }
}
