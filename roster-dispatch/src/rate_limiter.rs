//! Per-channel rate limiting using the token bucket algorithm
//!
//! Each channel gets its own bucket so that a saturated messenger never
//! throttles SMS traffic and vice versa. Buckets are refilled continuously,
//! proportional to the wall-clock time elapsed since the last access.
//!
//! # Token Bucket Algorithm
//!
//! - Tokens are added to the bucket at a constant rate (`refill_per_minute`)
//! - Each message consumes one token
//! - If no tokens are available the message is queued instead of sent
//! - The bucket never holds more than `capacity` tokens
//!
//! # Example
//!
//! ```text
//! Messenger: capacity 100, refill 100/min
//! - Bucket starts with 100 tokens
//! - 100 messages can go out immediately
//! - Afterwards one token becomes available every 600ms
//! ```

use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::Channel;

/// Lower bound on how long a timed acquisition sleeps between polls
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Upper bound on how long a timed acquisition sleeps between polls
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Stand-in deadline for timeouts too large to add to an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Configuration for rate limiting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Per-channel overrides of the built-in quotas
    #[serde(default)]
    pub channel_limits: BTreeMap<Channel, ChannelRateLimit>,
}

/// Per-channel rate limit override
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelRateLimit {
    /// Maximum number of tokens held at once
    pub capacity: u32,
    /// Tokens added per minute
    pub refill_per_minute: f64,
}

impl ChannelRateLimit {
    /// The quota the channel ships with
    #[must_use]
    pub fn builtin(channel: Channel) -> Self {
        Self {
            capacity: channel.per_minute_limit(),
            refill_per_minute: f64::from(channel.per_minute_limit()),
        }
    }
}

impl RateLimitConfig {
    /// Effective limit for a channel, honouring overrides
    #[must_use]
    pub fn limit_for(&self, channel: Channel) -> ChannelRateLimit {
        self.channel_limits
            .get(&channel)
            .copied()
            .unwrap_or_else(|| ChannelRateLimit::builtin(channel))
    }

    /// Sum of the configured per-minute refill rates over all channels
    #[must_use]
    pub fn combined_per_minute(&self) -> f64 {
        Channel::ALL
            .iter()
            .map(|c| self.limit_for(*c).refill_per_minute)
            .sum()
    }
}

#[derive(Debug)]
struct BucketState {
    /// Current number of tokens
    tokens: f64,
    /// Last time tokens were added
    last_refill: Instant,
}

/// Token bucket for a single channel
///
/// All operations lock the bucket's own mutex, so a refill and the
/// consumption that follows it are never interleaved with another caller.
#[derive(Debug)]
pub struct TokenBucket {
    /// Maximum tokens
    capacity: f64,
    /// Tokens added per minute
    refill_per_minute: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a new, full token bucket
    #[must_use]
    pub fn new(capacity: u32, refill_per_minute: f64) -> Self {
        let capacity = f64::from(capacity);
        Self {
            capacity,
            refill_per_minute: refill_per_minute.max(0.0),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Refill tokens based on elapsed time
    fn refill_locked(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed_minutes = now.duration_since(state.last_refill).as_secs_f64() / 60.0;

        let tokens_to_add = elapsed_minutes * self.refill_per_minute;
        state.tokens = (state.tokens + tokens_to_add).clamp(0.0, self.capacity);
        state.last_refill = now;
    }

    /// Recompute the available tokens from the time elapsed since the last refill
    pub fn refill(&self) {
        let mut state = self.state.lock();
        self.refill_locked(&mut state);
    }

    /// Try to consume `n` tokens, returns true if successful
    ///
    /// On failure the bucket is left untouched apart from the refill.
    pub fn try_consume(&self, n: u32) -> bool {
        let mut state = self.state.lock();
        self.refill_locked(&mut state);

        let wanted = f64::from(n);
        if state.tokens >= wanted {
            state.tokens -= wanted;
            true
        } else {
            false
        }
    }

    /// Currently available tokens, after refilling
    pub fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill_locked(&mut state);
        state.tokens
    }

    /// Time until at least one token is projected to be available
    ///
    /// Returns `Duration::MAX` for a bucket that never refills and is empty.
    pub fn time_until_available(&self) -> Duration {
        let mut state = self.state.lock();
        self.refill_locked(&mut state);

        if state.tokens >= 1.0 {
            return Duration::ZERO;
        }
        if self.refill_per_minute <= 0.0 {
            return Duration::MAX;
        }

        let tokens_needed = 1.0 - state.tokens;
        let minutes = tokens_needed / self.refill_per_minute;
        Duration::try_from_secs_f64(minutes * 60.0).unwrap_or(Duration::MAX)
    }

    /// Restore the bucket to full capacity
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.tokens = self.capacity;
        state.last_refill = Instant::now();
    }

    #[must_use]
    pub const fn capacity(&self) -> f64 {
        self.capacity
    }

    #[must_use]
    pub const fn refill_per_minute(&self) -> f64 {
        self.refill_per_minute
    }
}

/// Per-channel rate limiter manager
#[derive(Debug, Default)]
pub struct RateLimiter {
    /// Configuration
    config: RateLimitConfig,
    /// Per-channel token buckets, created on first use
    buckets: DashMap<Channel, Arc<TokenBucket>>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    /// Create a rate limiter with a bucket already in place for every channel
    #[must_use]
    pub fn with_all_channels(config: RateLimitConfig) -> Self {
        let limiter = Self::new(config);
        for channel in Channel::ALL {
            limiter.bucket(channel);
        }
        limiter
    }

    #[must_use]
    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Get or create the token bucket for a channel
    fn bucket(&self, channel: Channel) -> Arc<TokenBucket> {
        self.buckets
            .entry(channel)
            .or_insert_with(|| {
                let limit = self.config.limit_for(channel);
                Arc::new(TokenBucket::new(limit.capacity, limit.refill_per_minute))
            })
            .clone()
    }

    /// Take a single token for `channel` without waiting
    pub fn try_acquire(&self, channel: Channel) -> bool {
        self.try_acquire_n(channel, 1)
    }

    /// Take `n` tokens for `channel` without waiting
    pub fn try_acquire_n(&self, channel: Channel, n: u32) -> bool {
        let acquired = self.bucket(channel).try_consume(n);
        if !acquired {
            tracing::debug!(
                channel = %channel,
                requested = n,
                "Rate limit exceeded"
            );
        }
        acquired
    }

    /// Take `n` tokens for `channel`, waiting up to `timeout` for them to refill
    ///
    /// Polls at a granularity between 5ms and 50ms, guided by the projected
    /// refill time. Returns `false` once the timeout elapses.
    pub async fn acquire_within(&self, channel: Channel, n: u32, timeout: Duration) -> bool {
        let bucket = self.bucket(channel);
        let start = tokio::time::Instant::now();
        let deadline = start
            .checked_add(timeout)
            .unwrap_or_else(|| start + FAR_FUTURE);

        loop {
            if bucket.try_consume(n) {
                return true;
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                tracing::debug!(
                    channel = %channel,
                    requested = n,
                    timeout = ?timeout,
                    "Timed out waiting for rate limit tokens"
                );
                return false;
            }

            let wait = bucket
                .time_until_available()
                .clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
                .min(deadline - now);
            tokio::time::sleep(wait).await;
        }
    }

    /// Currently available tokens for a channel
    pub fn available_tokens(&self, channel: Channel) -> f64 {
        self.bucket(channel).available_tokens()
    }

    /// Time until a token is projected to be available, zero if one is available now
    pub fn remaining_time(&self, channel: Channel) -> Duration {
        self.bucket(channel).time_until_available()
    }

    /// Restore a channel's bucket to full capacity
    pub fn reset_bucket(&self, channel: Channel) {
        self.bucket(channel).reset();
        tracing::info!(channel = %channel, "Rate limit bucket reset");
    }

    /// Snapshot of every channel's bucket
    pub fn status(&self) -> RateLimiterStatus {
        let channels = Channel::ALL
            .iter()
            .map(|&channel| {
                let bucket = self.bucket(channel);
                let available_tokens = bucket.available_tokens();
                let capacity = bucket.capacity();
                let usage_rate = if capacity > 0.0 {
                    1.0 - available_tokens / capacity
                } else {
                    0.0
                };

                (
                    channel,
                    BucketStatus {
                        available_tokens,
                        capacity,
                        refill_per_minute: bucket.refill_per_minute(),
                        usage_rate,
                    },
                )
            })
            .collect();

        RateLimiterStatus {
            timestamp: Utc::now(),
            channels,
        }
    }
}

/// Statistics for a channel's bucket
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketStatus {
    /// Currently available tokens
    pub available_tokens: f64,
    /// Maximum capacity
    pub capacity: f64,
    /// Refill rate (tokens per minute)
    pub refill_per_minute: f64,
    /// Fraction of the bucket in use, `1 - available / capacity`
    pub usage_rate: f64,
}

/// Snapshot of all channel buckets
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStatus {
    pub timestamp: DateTime<Utc>,
    pub channels: BTreeMap<Channel, BucketStatus>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn backdate(bucket: &TokenBucket, by: Duration) {
        let mut state = bucket.state.lock();
        state.last_refill = Instant::now().checked_sub(by).unwrap();
    }

    #[test]
    fn test_token_bucket_consume() {
        let bucket = TokenBucket::new(20, 600.0);

        // Should start with full capacity
        assert!(bucket.available_tokens() >= 19.9);

        assert!(bucket.try_consume(1));
        for _ in 0..19 {
            assert!(bucket.try_consume(1));
        }

        // Should fail when empty
        assert!(!bucket.try_consume(1));
    }

    #[test]
    fn test_failed_consume_leaves_tokens() {
        let bucket = TokenBucket::new(5, 0.0);
        assert!(bucket.try_consume(3));
        assert!(!bucket.try_consume(3));
        assert!((bucket.available_tokens() - 2.0).abs() < f64::EPSILON);
        assert!(bucket.try_consume(2));
    }

    #[test]
    #[cfg_attr(miri, ignore = "Time-based test not compatible with Miri")]
    fn test_token_bucket_refill_is_proportional() {
        let bucket = TokenBucket::new(100, 100.0);
        assert!(bucket.try_consume(100));
        assert!(!bucket.try_consume(1));

        // 30 seconds at 100/min is 50 tokens
        backdate(&bucket, Duration::from_secs(30));
        bucket.refill();

        let tokens = bucket.available_tokens();
        assert!((49.9..=50.1).contains(&tokens), "tokens = {tokens}");
        assert!(bucket.try_consume(1));
    }

    #[test]
    #[cfg_attr(miri, ignore = "Time-based test not compatible with Miri")]
    fn test_refill_never_exceeds_capacity() {
        let bucket = TokenBucket::new(10, 100.0);
        assert!(bucket.try_consume(4));

        backdate(&bucket, Duration::from_secs(3600));
        assert!((bucket.available_tokens() - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_time_until_available() {
        let bucket = TokenBucket::new(1, 60.0);
        assert_eq!(bucket.time_until_available(), Duration::ZERO);

        assert!(bucket.try_consume(1));
        let wait = bucket.time_until_available();
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_secs(1));

        let static_bucket = TokenBucket::new(1, 0.0);
        assert!(static_bucket.try_consume(1));
        assert_eq!(static_bucket.time_until_available(), Duration::MAX);
    }

    #[test]
    fn test_exactly_capacity_acquisitions_succeed() {
        let limiter = RateLimiter::new(RateLimitConfig::default());

        for i in 0..100 {
            assert!(limiter.try_acquire(Channel::Messenger), "acquire {i} failed");
        }
        assert!(!limiter.try_acquire(Channel::Messenger));

        // SMS is throttled independently
        assert!(limiter.try_acquire(Channel::Sms));
    }

    #[test]
    fn test_reset_bucket_restores_capacity() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        assert!(limiter.try_acquire_n(Channel::Sms, 450));
        assert!(limiter.available_tokens(Channel::Sms) < 51.0);

        limiter.reset_bucket(Channel::Sms);
        assert!((limiter.available_tokens(Channel::Sms) - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_read_only_queries_create_full_buckets() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        assert!(limiter.buckets.is_empty());

        assert!((limiter.available_tokens(Channel::Messenger) - 100.0).abs() < f64::EPSILON);
        assert_eq!(limiter.remaining_time(Channel::Sms), Duration::ZERO);
        assert_eq!(limiter.buckets.len(), 2);
    }

    #[test]
    fn test_channel_override() {
        let mut config = RateLimitConfig::default();
        config.channel_limits.insert(
            Channel::Messenger,
            ChannelRateLimit {
                capacity: 3,
                refill_per_minute: 3.0,
            },
        );

        let limiter = RateLimiter::with_all_channels(config);
        for _ in 0..3 {
            assert!(limiter.try_acquire(Channel::Messenger));
        }
        assert!(!limiter.try_acquire(Channel::Messenger));
        assert!(limiter.remaining_time(Channel::Messenger) > Duration::ZERO);
    }

    #[test]
    fn test_status_snapshot() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        assert!(limiter.try_acquire_n(Channel::Messenger, 25));

        let status = limiter.status();
        assert_eq!(status.channels.len(), 2);

        let messenger = &status.channels[&Channel::Messenger];
        assert!((messenger.capacity - 100.0).abs() < f64::EPSILON);
        assert!((messenger.refill_per_minute - 100.0).abs() < f64::EPSILON);
        assert!((messenger.usage_rate - 0.25).abs() < 0.01);

        let sms = &status.channels[&Channel::Sms];
        assert!(sms.usage_rate.abs() < 0.01);
    }

    #[tokio::test]
    async fn test_acquire_within_times_out() {
        let mut config = RateLimitConfig::default();
        config.channel_limits.insert(
            Channel::Sms,
            ChannelRateLimit {
                capacity: 1,
                refill_per_minute: 0.0,
            },
        );
        let limiter = RateLimiter::new(config);

        assert!(limiter.acquire_within(Channel::Sms, 1, Duration::from_millis(20)).await);
        let started = std::time::Instant::now();
        assert!(!limiter.acquire_within(Channel::Sms, 1, Duration::from_millis(30)).await);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_acquire_within_waits_for_refill() {
        let mut config = RateLimitConfig::default();
        // One token every 10ms
        config.channel_limits.insert(
            Channel::Messenger,
            ChannelRateLimit {
                capacity: 1,
                refill_per_minute: 6000.0,
            },
        );
        let limiter = RateLimiter::new(config);

        assert!(limiter.try_acquire(Channel::Messenger));
        assert!(
            limiter
                .acquire_within(Channel::Messenger, 1, Duration::from_millis(500))
                .await
        );
    }
}
