//! Type definitions for send requests

use serde::{Deserialize, Serialize};

use crate::{
    Channel,
    error::{DispatchError, PermanentError},
};

/// Longest body accepted by either channel endpoint
pub const MAX_BODY_LENGTH: usize = 2000;

const MIN_PHONE_DIGITS: usize = 8;
const MAX_PHONE_DIGITS: usize = 15;

/// A notification to deliver to one member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    pub recipient_name: String,
    /// Phone number, in loose international form (`+44 7700-900123`)
    pub recipient_address: String,
    pub body: String,
    pub preferred_channel: Channel,
    /// Bulk job this send belongs to, if any
    #[serde(default)]
    pub job_id: Option<String>,
}

impl SendRequest {
    pub fn new(
        recipient_name: impl Into<String>,
        recipient_address: impl Into<String>,
        body: impl Into<String>,
        preferred_channel: Channel,
    ) -> Self {
        Self {
            recipient_name: recipient_name.into(),
            recipient_address: recipient_address.into(),
            body: body.into(),
            preferred_channel,
            job_id: None,
        }
    }

    #[must_use]
    pub fn with_job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    /// Reject malformed input before it reaches the rate limiter or queue.
    ///
    /// # Errors
    ///
    /// Returns [`PermanentError::InvalidRecipient`] for an empty name or a
    /// malformed phone number, and [`PermanentError::InvalidBody`] for an
    /// empty or oversized body.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.recipient_name.trim().is_empty() {
            return Err(PermanentError::InvalidRecipient("recipient name is empty".to_string()).into());
        }

        validate_phone_number(&self.recipient_address)?;

        if self.body.trim().is_empty() {
            return Err(PermanentError::InvalidBody("body is empty".to_string()).into());
        }

        let length = self.body.chars().count();
        if length > MAX_BODY_LENGTH {
            return Err(PermanentError::InvalidBody(format!(
                "body is {length} characters, limit is {MAX_BODY_LENGTH}"
            ))
            .into());
        }

        Ok(())
    }
}

/// Accepts an optional leading `+`, then digits separated by spaces or hyphens.
fn validate_phone_number(address: &str) -> Result<(), DispatchError> {
    let trimmed = address.trim();
    let rest = trimmed.strip_prefix('+').unwrap_or(trimmed);

    let mut digits = 0;
    for c in rest.chars() {
        match c {
            '0'..='9' => digits += 1,
            ' ' | '-' => {}
            _ => {
                return Err(PermanentError::InvalidRecipient(format!(
                    "'{address}' contains '{c}'"
                ))
                .into());
            }
        }
    }

    if !(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits) {
        return Err(PermanentError::InvalidRecipient(format!(
            "'{address}' has {digits} digits, expected {MIN_PHONE_DIGITS} to {MAX_PHONE_DIGITS}"
        ))
        .into());
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn request(address: &str, body: &str) -> SendRequest {
        SendRequest::new("Grace", address, body, Channel::Messenger)
    }

    #[test]
    fn test_valid_requests() {
        for address in ["+447700900123", "07700 900123", "+1 555-010-9999", "12345678"] {
            assert!(request(address, "hi").validate().is_ok(), "{address}");
        }
    }

    #[test]
    fn test_invalid_recipients() {
        for address in ["", "+", "1234567", "+1234567890123456", "555-CALL-NOW", "++4477009001"] {
            let err = request(address, "hi").validate().unwrap_err();
            assert_eq!(err.code(), "INVALID_RECIPIENT", "{address}");
        }

        let mut req = request("+447700900123", "hi");
        req.recipient_name = "  ".to_string();
        assert_eq!(req.validate().unwrap_err().code(), "INVALID_RECIPIENT");
    }

    #[test]
    fn test_invalid_bodies() {
        let err = request("+447700900123", "   ").validate().unwrap_err();
        assert_eq!(err.code(), "INVALID_BODY");

        let long = "x".repeat(MAX_BODY_LENGTH + 1);
        let err = request("+447700900123", &long).validate().unwrap_err();
        assert!(err.is_permanent());

        let exact = "x".repeat(MAX_BODY_LENGTH);
        assert!(request("+447700900123", &exact).validate().is_ok());
    }

    #[test]
    fn test_job_id() {
        let req = request("+447700900123", "hi").with_job("spring-camp");
        assert_eq!(req.job_id.as_deref(), Some("spring-camp"));
    }
}
