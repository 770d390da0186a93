//! Typed error handling for dispatch operations.
//!
//! Errors are split into three groups so the send path can decide what to do:
//! - Permanent failures (bad input, rejected by the endpoint) - don't retry
//! - Temporary failures (timeouts, remote 5xx, throttling) - retry with backoff
//! - System errors - internal problems

use thiserror::Error;

use crate::client::ChannelError;

/// Top-level dispatch error type.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Permanent failure that should not be retried.
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    /// Temporary failure that can be retried with backoff.
    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),

    /// System-level error.
    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// Permanent errors that should not be retried.
#[derive(Debug, Error)]
pub enum PermanentError {
    /// Recipient name or address is malformed.
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    /// Message body is empty or too long.
    #[error("Invalid message body: {0}")]
    InvalidBody(String),

    /// The endpoint refused the message.
    #[error("Message rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    /// Basic credentials were not accepted.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
}

/// Temporary errors that should be retried with exponential backoff.
#[derive(Debug, Error)]
pub enum TemporaryError {
    /// Failed to reach the endpoint.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The request did not complete in time.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The endpoint answered with a server error.
    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    /// The endpoint throttled us.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The channel reports itself unavailable.
    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),
}

/// System-level errors that indicate internal problems.
#[derive(Debug, Error)]
pub enum SystemError {
    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A component was used before it was wired up.
    #[error("Not initialized: {0}")]
    NotInitialized(String),

    /// The channel client panicked while sending.
    #[error("Channel client panicked: {0}")]
    ClientPanicked(String),

    /// Other internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Returns `true` if this error is temporary and should be retried.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Returns `true` if this error is permanent and should not be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// Returns `true` if this is a system error.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }

    /// Short machine-readable code, used in attempt records and metrics
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Permanent(PermanentError::InvalidRecipient(_)) => "INVALID_RECIPIENT",
            Self::Permanent(PermanentError::InvalidBody(_)) => "INVALID_BODY",
            Self::Permanent(PermanentError::Rejected { .. }) => "REJECTED",
            Self::Permanent(PermanentError::AuthenticationFailed(_)) => "AUTH_FAILED",
            Self::Temporary(TemporaryError::ConnectionFailed(_)) => "CONNECTION_FAILED",
            Self::Temporary(TemporaryError::Timeout(_)) => "TIMEOUT",
            Self::Temporary(TemporaryError::ServerError { .. }) => "SERVER_ERROR",
            Self::Temporary(TemporaryError::RateLimited(_)) => "REMOTE_RATE_LIMITED",
            Self::Temporary(TemporaryError::ChannelUnavailable(_)) => "CHANNEL_UNAVAILABLE",
            Self::System(SystemError::Configuration(_)) => "CONFIGURATION",
            Self::System(SystemError::NotInitialized(_)) => "NOT_INITIALIZED",
            Self::System(SystemError::ClientPanicked(_)) => "CLIENT_PANICKED",
            Self::System(SystemError::Internal(_)) => "INTERNAL",
        }
    }
}

/// Convert a channel client error into a `DispatchError`.
///
/// - **5xx, timeouts, transport errors, 429** → Temporary (should retry)
/// - **401/403** → Permanent authentication failure
/// - **other 4xx and explicit rejections** → Permanent (should not retry)
/// - **undecodable responses** → System
impl From<ChannelError> for DispatchError {
    fn from(error: ChannelError) -> Self {
        match error {
            ChannelError::Rejected { code, message } => {
                Self::Permanent(PermanentError::Rejected { code, message })
            }
            ChannelError::Status { status, body } => match status {
                401 | 403 => Self::Permanent(PermanentError::AuthenticationFailed(format!(
                    "{status} {body}"
                ))),
                429 => Self::Temporary(TemporaryError::RateLimited(body)),
                500..=599 => Self::Temporary(TemporaryError::ServerError {
                    status,
                    message: body,
                }),
                400..=499 => Self::Permanent(PermanentError::Rejected {
                    code: status.to_string(),
                    message: body,
                }),
                _ => Self::System(SystemError::Internal(format!(
                    "Unexpected HTTP status: {status} {body}"
                ))),
            },
            ChannelError::Timeout(msg) => Self::Temporary(TemporaryError::Timeout(msg)),
            ChannelError::Transport(msg) => {
                Self::Temporary(TemporaryError::ConnectionFailed(msg))
            }
            ChannelError::Decode(msg) => Self::System(SystemError::Internal(format!(
                "Malformed channel response: {msg}"
            ))),
            ChannelError::Disabled(channel) => Self::Temporary(
                TemporaryError::ChannelUnavailable(format!("{channel} is disabled")),
            ),
        }
    }
}
