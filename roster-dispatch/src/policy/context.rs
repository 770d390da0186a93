//! Per-send attempt history.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{Channel, error::DispatchError, policy::RetryPolicy, types::SendRequest};

/// A single finished attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryAttempt {
    pub attempt_number: u32,
    pub channel: Channel,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    /// Message id on success, error code on failure
    pub message: String,
    /// Free-form details, usually the error text
    pub details: Option<String>,
}

impl RetryAttempt {
    #[must_use]
    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

/// Immutable summary produced once a send is finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrySummary {
    pub recipient_address: String,
    pub total_attempts: u32,
    pub final_success: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub attempts: Vec<RetryAttempt>,
    pub last_error: Option<String>,
}

impl RetrySummary {
    /// Channel of the attempt that decided the outcome
    #[must_use]
    pub fn final_channel(&self) -> Option<Channel> {
        self.attempts.last().map(|a| a.channel)
    }

    #[must_use]
    pub fn channels_tried(&self) -> Vec<Channel> {
        let mut channels = Vec::with_capacity(2);
        for attempt in &self.attempts {
            if !channels.contains(&attempt.channel) {
                channels.push(attempt.channel);
            }
        }
        channels
    }
}

/// Mutable state for one logical send.
///
/// Call [`start_new_attempt`](Self::start_new_attempt) before every try and
/// exactly one of [`record_success`](Self::record_success) or
/// [`record_failure`](Self::record_failure) after it.
#[derive(Debug)]
pub struct RetryContext {
    request: SendRequest,
    policy: RetryPolicy,
    started_at: DateTime<Utc>,
    current_attempt: u32,
    current_channel: Channel,
    attempt_started_at: DateTime<Utc>,
    attempts: Vec<RetryAttempt>,
    last_error: Option<String>,
}

impl RetryContext {
    #[must_use]
    pub fn new(request: SendRequest, policy: RetryPolicy) -> Self {
        let now = Utc::now();
        let channel = request.preferred_channel;
        Self {
            request,
            policy,
            started_at: now,
            current_attempt: 0,
            current_channel: channel,
            attempt_started_at: now,
            attempts: Vec::new(),
            last_error: None,
        }
    }

    #[must_use]
    pub const fn request(&self) -> &SendRequest {
        &self.request
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    #[must_use]
    pub const fn current_attempt(&self) -> u32 {
        self.current_attempt
    }

    #[must_use]
    pub fn attempts(&self) -> &[RetryAttempt] {
        &self.attempts
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Begin the next attempt on `channel`, returning its number.
    pub fn start_new_attempt(&mut self, channel: Channel) -> u32 {
        self.current_attempt += 1;
        self.current_channel = channel;
        self.attempt_started_at = Utc::now();
        self.current_attempt
    }

    /// Whether the policy allows another attempt after the current one.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.policy.should_retry(self.current_attempt)
    }

    /// Delay to wait before the next attempt.
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        self.policy.calculate_delay(self.current_attempt + 1)
    }

    pub fn record_success(&mut self, message_id: impl Into<String>) {
        self.push(true, message_id.into(), None);
    }

    pub fn record_failure(&mut self, error: &DispatchError) {
        let details = error.to_string();
        self.last_error = Some(details.clone());
        self.push(false, error.code().to_string(), Some(details));
    }

    fn push(&mut self, success: bool, message: String, details: Option<String>) {
        self.attempts.push(RetryAttempt {
            attempt_number: self.current_attempt,
            channel: self.current_channel,
            started_at: self.attempt_started_at,
            finished_at: Utc::now(),
            success,
            message,
            details,
        });
    }

    #[must_use]
    pub fn create_summary(&self) -> RetrySummary {
        RetrySummary {
            recipient_address: self.request.recipient_address.clone(),
            total_attempts: u32::try_from(self.attempts.len()).unwrap_or(u32::MAX),
            final_success: self.attempts.last().is_some_and(|a| a.success),
            started_at: self.started_at,
            finished_at: Utc::now(),
            attempts: self.attempts.clone(),
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TemporaryError;

    fn request() -> SendRequest {
        SendRequest::new("Ada", "+44 7700 900123", "Practice moved to 7pm", Channel::Messenger)
    }

    #[test]
    fn test_attempts_are_numbered_and_recorded() {
        let mut ctx = RetryContext::new(request(), RetryPolicy::default());
        assert_eq!(ctx.current_attempt(), 0);

        assert_eq!(ctx.start_new_attempt(Channel::Messenger), 1);
        ctx.record_failure(&DispatchError::Temporary(TemporaryError::Timeout(
            "10s".to_string(),
        )));
        assert!(ctx.should_retry());

        assert_eq!(ctx.start_new_attempt(Channel::Sms), 2);
        ctx.record_success("sms-123");

        let attempts = ctx.attempts();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].attempt_number, 1);
        assert!(!attempts[0].success);
        assert_eq!(attempts[0].message, "TIMEOUT");
        assert_eq!(attempts[1].channel, Channel::Sms);
        assert_eq!(attempts[1].message, "sms-123");
        assert!(attempts[1].finished_at >= attempts[1].started_at);
    }

    #[test]
    fn test_summary_uses_last_attempt() {
        let mut ctx = RetryContext::new(request(), RetryPolicy::default());
        ctx.start_new_attempt(Channel::Messenger);
        ctx.record_success("m-1");
        ctx.start_new_attempt(Channel::Messenger);
        ctx.record_failure(&DispatchError::Temporary(TemporaryError::ConnectionFailed(
            "refused".to_string(),
        )));

        let summary = ctx.create_summary();
        assert!(!summary.final_success);
        assert_eq!(summary.total_attempts, 2);
        assert_eq!(summary.final_channel(), Some(Channel::Messenger));
        assert_eq!(summary.channels_tried(), vec![Channel::Messenger]);
        assert!(summary.last_error.is_some());
    }

    #[test]
    fn test_empty_summary_is_not_successful() {
        let ctx = RetryContext::new(request(), RetryPolicy::none());
        let summary = ctx.create_summary();
        assert!(!summary.final_success);
        assert_eq!(summary.total_attempts, 0);
        assert_eq!(summary.final_channel(), None);
    }
}
