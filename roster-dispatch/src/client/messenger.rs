//! Chat-app messenger endpoint
//!
//! `POST {base_url}/messages` with `{"to", "sender", "text"}`; the endpoint
//! answers `{"success": true, "message_id": ..}` or
//! `{"success": false, "error_code": .., "error_message": ..}`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ChannelClient, ChannelError, EndpointConfig, SendReceipt, http::HttpEndpoint};
use crate::{Channel, error::SystemError};

const SEND_PATH: &str = "messages";

#[derive(Debug, Serialize)]
struct MessengerRequest<'a> {
    to: &'a str,
    sender: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessengerResponse {
    success: bool,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

/// Client for the primary channel
#[derive(Debug, Clone)]
pub struct MessengerClient {
    endpoint: HttpEndpoint,
}

impl MessengerClient {
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(config: EndpointConfig) -> Result<Self, SystemError> {
        Ok(Self {
            endpoint: HttpEndpoint::new(Channel::Messenger, config)?,
        })
    }
}

#[async_trait]
impl ChannelClient for MessengerClient {
    fn channel(&self) -> Channel {
        Channel::Messenger
    }

    async fn send(
        &self,
        recipient_address: &str,
        body: &str,
    ) -> Result<SendReceipt, ChannelError> {
        let request = MessengerRequest {
            to: recipient_address,
            sender: &self.endpoint.config().sender,
            text: body,
        };

        let response: MessengerResponse = self.endpoint.post_json(SEND_PATH, &request).await?;

        if !response.success {
            return Err(ChannelError::Rejected {
                code: response.error_code.unwrap_or_else(|| "UNKNOWN".to_string()),
                message: response.error_message.unwrap_or_default(),
            });
        }

        let message_id = response
            .message_id
            .ok_or_else(|| ChannelError::Decode("success without message_id".to_string()))?;

        Ok(SendReceipt {
            channel: Channel::Messenger,
            message_id,
        })
    }

    async fn is_available(&self) -> bool {
        self.endpoint.is_available().await
    }
}
