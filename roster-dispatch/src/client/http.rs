use std::time::Duration;

use reqwest::{Client, Response};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::ChannelError;
use crate::{Channel, error::SystemError};

/// Connection settings for one external channel endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Base URL of the endpoint, e.g. `https://sms.example.net/api`
    #[serde(default)]
    pub base_url: String,

    /// Basic auth username
    #[serde(default)]
    pub username: String,

    /// Basic auth password
    #[serde(default)]
    pub password: String,

    /// Sender identity presented to the recipient
    #[serde(default = "default_sender")]
    pub sender: String,

    /// Request timeout
    ///
    /// Default: 10 seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Path probed with a GET to decide availability
    #[serde(default)]
    pub health_path: Option<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            password: String::new(),
            sender: default_sender(),
            timeout_secs: default_timeout_secs(),
            enabled: default_enabled(),
            health_path: None,
        }
    }
}

fn default_sender() -> String {
    "Roster".to_string()
}

const fn default_timeout_secs() -> u64 {
    10
}

const fn default_enabled() -> bool {
    true
}

const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

impl EndpointConfig {
    /// Whether enough is configured to attempt a send
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.base_url.trim().is_empty()
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Shared HTTP plumbing for the channel clients
#[derive(Debug, Clone)]
pub(super) struct HttpEndpoint {
    channel: Channel,
    config: EndpointConfig,
    client: Client,
}

impl HttpEndpoint {
    pub(super) fn new(channel: Channel, config: EndpointConfig) -> Result<Self, SystemError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                SystemError::Configuration(format!("Failed to create {channel} HTTP client: {e}"))
            })?;

        Ok(Self {
            channel,
            config,
            client,
        })
    }

    pub(super) const fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// POST `payload` as JSON with basic credentials and decode the reply
    pub(super) async fn post_json<T, R>(&self, path: &str, payload: &T) -> Result<R, ChannelError>
    where
        T: Serialize + Sync,
        R: DeserializeOwned,
    {
        if !self.config.enabled || !self.config.is_configured() {
            return Err(ChannelError::Disabled(self.channel));
        }

        let url = self.config.url(path);
        roster_common::outgoing!("POST {} ({})", url, self.channel);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .json(payload)
            .send()
            .await?;

        let response = Self::check_status(response).await?;
        let decoded = response
            .json::<R>()
            .await
            .map_err(|e| ChannelError::Decode(e.to_string()))?;

        roster_common::incoming!("{} replied from {}", self.channel, url);
        Ok(decoded)
    }

    async fn check_status(response: Response) -> Result<Response, ChannelError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ChannelError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Enabled, configured and, when a health path is set, answering it
    pub(super) async fn is_available(&self) -> bool {
        if !self.config.enabled || !self.config.is_configured() {
            return false;
        }

        let Some(path) = self.config.health_path.as_deref() else {
            return true;
        };

        let url = self.config.url(path);
        match self
            .client
            .get(&url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .timeout(HEALTH_PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(channel = %self.channel, url = %url, error = %e, "Health probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let config = EndpointConfig {
            base_url: "http://localhost:8080/api/".to_string(),
            ..EndpointConfig::default()
        };
        assert_eq!(config.url("/messages"), "http://localhost:8080/api/messages");
        assert_eq!(config.url("health"), "http://localhost:8080/api/health");
    }

    #[test]
    fn test_unconfigured_endpoint() {
        let config = EndpointConfig::default();
        assert!(!config.is_configured());
        assert!(config.enabled);
        assert_eq!(config.timeout_secs, 10);
    }
}
