//! Channel client capability and its HTTP implementations.
//!
//! Each external endpoint is reached through a [`ChannelClient`]. The
//! dispatcher selects the client by [`Channel`] value and never calls
//! [`ChannelClient::send`] directly: [`send_guarded`] converts errors and
//! panics into [`DispatchError`]s at the send boundary.

mod http;
pub mod messenger;
pub mod sms;

use std::{collections::BTreeMap, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::Serialize;
use thiserror::Error;

pub use http::EndpointConfig;
pub use messenger::MessengerClient;
pub use sms::SmsClient;

use crate::{
    Channel,
    error::{DispatchError, SystemError},
};

/// Proof of a message accepted by an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    pub channel: Channel,
    pub message_id: String,
}

/// Failure reported by a single channel endpoint
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The endpoint answered, but refused the message
    #[error("rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    /// Non-success HTTP status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// The response body could not be understood
    #[error("undecodable response: {0}")]
    Decode(String),

    #[error("{0} is disabled")]
    Disabled(Channel),
}

impl From<reqwest::Error> for ChannelError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(error.to_string())
        } else if error.is_decode() {
            Self::Decode(error.to_string())
        } else if let Some(status) = error.status() {
            Self::Status {
                status: status.as_u16(),
                body: error.to_string(),
            }
        } else {
            Self::Transport(error.to_string())
        }
    }
}

/// A way of delivering a body to a phone number
#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// The channel this client delivers on
    fn channel(&self) -> Channel;

    /// Deliver `body` to `recipient_address`
    ///
    /// # Errors
    ///
    /// Returns a [`ChannelError`] describing why the endpoint did not accept
    /// the message.
    async fn send(&self, recipient_address: &str, body: &str)
    -> Result<SendReceipt, ChannelError>;

    /// Whether the endpoint is currently worth trying
    async fn is_available(&self) -> bool;
}

/// Send through `client`, converting errors and panics into `DispatchError`s
///
/// # Errors
///
/// Returns the converted client error, or [`SystemError::ClientPanicked`] if
/// the client panicked.
pub async fn send_guarded(
    client: &dyn ChannelClient,
    recipient_address: &str,
    body: &str,
) -> Result<SendReceipt, DispatchError> {
    match AssertUnwindSafe(client.send(recipient_address, body))
        .catch_unwind()
        .await
    {
        Ok(result) => result.map_err(DispatchError::from),
        Err(panic) => Err(SystemError::ClientPanicked(panic_message(panic.as_ref())).into()),
    }
}

/// Availability check that treats a panicking client as unavailable
pub async fn is_available_guarded(client: &dyn ChannelClient) -> bool {
    AssertUnwindSafe(client.is_available())
        .catch_unwind()
        .await
        .unwrap_or(false)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// The registered client for every channel
#[derive(Clone, Default)]
pub struct ChannelClients {
    clients: BTreeMap<Channel, Arc<dyn ChannelClient>>,
}

impl std::fmt::Debug for ChannelClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.clients.keys()).finish()
    }
}

impl ChannelClients {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client` under the channel it reports
    #[must_use]
    pub fn with(mut self, client: Arc<dyn ChannelClient>) -> Self {
        self.insert(client);
        self
    }

    pub fn insert(&mut self, client: Arc<dyn ChannelClient>) {
        self.clients.insert(client.channel(), client);
    }

    #[must_use]
    pub fn get(&self, channel: Channel) -> Option<&Arc<dyn ChannelClient>> {
        self.clients.get(&channel)
    }

    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.clients.keys().copied()
    }

    /// Whether a client exists for `channel` and reports itself available
    pub async fn is_available(&self, channel: Channel) -> bool {
        match self.get(channel) {
            Some(client) => is_available_guarded(client.as_ref()).await,
            None => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    struct Panicking;

    #[async_trait]
    impl ChannelClient for Panicking {
        fn channel(&self) -> Channel {
            Channel::Sms
        }

        async fn send(&self, _: &str, _: &str) -> Result<SendReceipt, ChannelError> {
            panic!("gateway exploded")
        }

        async fn is_available(&self) -> bool {
            panic!("probe exploded")
        }
    }

    struct Refusing;

    #[async_trait]
    impl ChannelClient for Refusing {
        fn channel(&self) -> Channel {
            Channel::Messenger
        }

        async fn send(&self, _: &str, _: &str) -> Result<SendReceipt, ChannelError> {
            Err(ChannelError::Rejected {
                code: "BLOCKED".to_string(),
                message: "user blocked sender".to_string(),
            })
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_system_error() {
        let err = send_guarded(&Panicking, "+447700900123", "hi")
            .await
            .unwrap_err();
        assert!(err.is_system());
        assert_eq!(err.code(), "CLIENT_PANICKED");
        assert!(err.to_string().contains("gateway exploded"));

        assert!(!is_available_guarded(&Panicking).await);
    }

    #[tokio::test]
    async fn test_client_error_is_converted() {
        let err = send_guarded(&Refusing, "+447700900123", "hi")
            .await
            .unwrap_err();
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_registry_lookup() {
        let clients = ChannelClients::new()
            .with(Arc::new(Refusing))
            .with(Arc::new(Panicking));

        assert_eq!(
            clients.channels().collect::<Vec<_>>(),
            vec![Channel::Messenger, Channel::Sms]
        );
        assert!(clients.is_available(Channel::Messenger).await);
        assert!(!clients.is_available(Channel::Sms).await);
        assert!(!ChannelClients::new().is_available(Channel::Sms).await);
    }
}
