//! Retry policy for send operations.
//!
//! The policy is immutable and stateless: it answers "may I try again?" and
//! "how long should I wait first?" for a given attempt number. Per-send state
//! lives in [`RetryContext`](super::RetryContext).

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when validating a retry policy.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RetryPolicyError {
    #[error("max_attempts must be at least 1, got {0}")]
    MaxAttemptsTooLow(u32),

    #[error("initial delay ({initial:?}) must not exceed max delay ({max:?})")]
    InitialDelayExceedsMax { initial: Duration, max: Duration },

    #[error("backoff multiplier must be a finite number >= 1.0, got {0}")]
    InvalidMultiplier(f64),
}

/// Named retry presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPreset {
    /// 3 attempts, 1s initial, 30s cap, x2, jitter
    Default,
    /// 5 attempts, 2s initial, 2min cap, x1.5, jitter
    Conservative,
    /// 2 attempts, 500ms initial, 10s cap, x2, no jitter
    Aggressive,
    /// A single attempt
    None,
}

/// Retry policy configuration for send operations.
///
/// Delays are stored in milliseconds so that the policy can be read straight
/// out of the configuration file; unsigned fields make negative delays
/// unrepresentable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRetryPolicy")]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    max_attempts: u32,

    /// Delay before the second attempt.
    initial_delay_ms: u64,

    /// Upper bound on any single delay.
    max_delay_ms: u64,

    /// Growth factor applied per additional attempt.
    backoff_multiplier: f64,

    /// Scale every delay by a random factor in `[0.5, 1.0]`.
    jitter_enabled: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::preset(RetryPreset::Default)
    }
}

impl RetryPolicy {
    /// Start building a custom policy, seeded with the default preset.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// Construct one of the named presets.
    #[must_use]
    pub const fn preset(preset: RetryPreset) -> Self {
        match preset {
            RetryPreset::Default => Self {
                max_attempts: 3,
                initial_delay_ms: 1_000,
                max_delay_ms: 30_000,
                backoff_multiplier: 2.0,
                jitter_enabled: true,
            },
            RetryPreset::Conservative => Self {
                max_attempts: 5,
                initial_delay_ms: 2_000,
                max_delay_ms: 120_000,
                backoff_multiplier: 1.5,
                jitter_enabled: true,
            },
            RetryPreset::Aggressive => Self {
                max_attempts: 2,
                initial_delay_ms: 500,
                max_delay_ms: 10_000,
                backoff_multiplier: 2.0,
                jitter_enabled: false,
            },
            RetryPreset::None => Self {
                max_attempts: 1,
                initial_delay_ms: 0,
                max_delay_ms: 0,
                backoff_multiplier: 1.0,
                jitter_enabled: false,
            },
        }
    }

    #[must_use]
    pub const fn conservative() -> Self {
        Self::preset(RetryPreset::Conservative)
    }

    #[must_use]
    pub const fn aggressive() -> Self {
        Self::preset(RetryPreset::Aggressive)
    }

    #[must_use]
    pub const fn none() -> Self {
        Self::preset(RetryPreset::None)
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    #[must_use]
    pub const fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    #[must_use]
    pub const fn jitter_enabled(&self) -> bool {
        self.jitter_enabled
    }

    /// Check if another attempt is allowed after `attempt_number` attempts.
    #[must_use]
    pub const fn should_retry(&self, attempt_number: u32) -> bool {
        attempt_number < self.max_attempts
    }

    /// Get the number of remaining attempts.
    #[must_use]
    pub const fn remaining_attempts(&self, attempt_number: u32) -> u32 {
        self.max_attempts.saturating_sub(attempt_number)
    }

    /// Check if `attempt_number` is the last one the policy allows.
    #[must_use]
    pub const fn is_final_attempt(&self, attempt_number: u32) -> bool {
        attempt_number >= self.max_attempts
    }

    /// Delay before the undelayed, capped backoff for `attempt_number`.
    ///
    /// # Formula
    /// `attempt 1 → 0`, `attempt n → min(initial * multiplier^(n - 2), max)`
    #[must_use]
    pub fn theoretical_delay(&self, attempt_number: u32) -> Duration {
        if attempt_number <= 1 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt_number - 2).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let millis = (self.initial_delay_ms as f64) * self.backoff_multiplier.powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let capped = millis.min(self.max_delay_ms as f64);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let nanos = (capped * 1_000_000.0).round() as u64;
        Duration::from_nanos(nanos)
    }

    /// Delay to wait before making `attempt_number`.
    ///
    /// With jitter enabled the theoretical delay is scaled by a uniform random
    /// factor in `[0.5, 1.0]`.
    #[must_use]
    pub fn calculate_delay(&self, attempt_number: u32) -> Duration {
        let delay = self.theoretical_delay(attempt_number);
        if !self.jitter_enabled || delay.is_zero() {
            return delay;
        }

        let factor: f64 = rand::rng().random_range(0.5..=1.0);
        delay.mul_f64(factor)
    }

    /// Check the invariants every policy must hold.
    ///
    /// # Errors
    ///
    /// Returns the first invariant that does not hold.
    pub fn validate(&self) -> Result<(), RetryPolicyError> {
        if self.max_attempts < 1 {
            return Err(RetryPolicyError::MaxAttemptsTooLow(self.max_attempts));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(RetryPolicyError::InitialDelayExceedsMax {
                initial: self.initial_delay(),
                max: self.max_delay(),
            });
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(RetryPolicyError::InvalidMultiplier(self.backoff_multiplier));
        }
        Ok(())
    }
}

/// Builder for custom retry policies.
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
        }
    }
}

impl RetryPolicyBuilder {
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.policy.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub const fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.policy.backoff_multiplier = multiplier;
        self
    }

    #[must_use]
    pub const fn jitter(mut self, enabled: bool) -> Self {
        self.policy.jitter_enabled = enabled;
        self
    }

    /// Validate and produce the policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured values violate any policy invariant.
    pub fn build(self) -> Result<RetryPolicy, RetryPolicyError> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}

/// On-disk shape of a retry policy: either a preset, or explicit values
/// layered over the default preset.
#[derive(Debug, Deserialize)]
struct RawRetryPolicy {
    #[serde(default)]
    preset: Option<RetryPreset>,
    #[serde(default)]
    max_attempts: Option<u32>,
    #[serde(default)]
    initial_delay_ms: Option<u64>,
    #[serde(default)]
    max_delay_ms: Option<u64>,
    #[serde(default)]
    backoff_multiplier: Option<f64>,
    #[serde(default)]
    jitter_enabled: Option<bool>,
}

impl TryFrom<RawRetryPolicy> for RetryPolicy {
    type Error = RetryPolicyError;

    fn try_from(raw: RawRetryPolicy) -> Result<Self, Self::Error> {
        let base = RetryPolicy::preset(raw.preset.unwrap_or(RetryPreset::Default));
        let policy = Self {
            max_attempts: raw.max_attempts.unwrap_or(base.max_attempts),
            initial_delay_ms: raw.initial_delay_ms.unwrap_or(base.initial_delay_ms),
            max_delay_ms: raw.max_delay_ms.unwrap_or(base.max_delay_ms),
            backoff_multiplier: raw.backoff_multiplier.unwrap_or(base.backoff_multiplier),
            jitter_enabled: raw.jitter_enabled.unwrap_or(base.jitter_enabled),
        };
        policy.validate()?;
        Ok(policy)
    }
}
