//! Notification delivery channels

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// One of the two external delivery mechanisms.
///
/// The set is closed: every channel carries its own display name and
/// per-minute quota, and the messenger is the primary channel with SMS as
/// its fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Chat-app messenger, 100 messages per minute
    Messenger,
    /// SMS gateway, 500 messages per minute
    Sms,
}

impl Channel {
    /// Every known channel, primary first
    pub const ALL: [Self; 2] = [Self::Messenger, Self::Sms];

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Messenger => "Messenger",
            Self::Sms => "SMS",
        }
    }

    /// Messages per minute the external endpoint accepts from us
    #[must_use]
    pub const fn per_minute_limit(self) -> u32 {
        match self {
            Self::Messenger => 100,
            Self::Sms => 500,
        }
    }

    #[must_use]
    pub const fn is_primary(self) -> bool {
        matches!(self, Self::Messenger)
    }

    /// The channel tried when this one fails
    #[must_use]
    pub const fn fallback(self) -> Self {
        match self {
            Self::Messenger => Self::Sms,
            Self::Sms => Self::Messenger,
        }
    }

    /// Sum of the per-minute limits of every channel
    #[must_use]
    pub fn combined_per_minute_limit() -> u32 {
        Self::ALL.iter().map(|c| c.per_minute_limit()).sum()
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Messenger => "messenger",
            Self::Sms => "sms",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Error returned when parsing an unknown channel name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown channel: {0}")]
pub struct UnknownChannel(pub String);

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "messenger" | "chat" => Ok(Self::Messenger),
            "sms" => Ok(Self::Sms),
            _ => Err(UnknownChannel(s.to_string())),
        }
    }
}
