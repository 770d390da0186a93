//! The send path: validate, take a token, deliver with retry and fallback,
//! or queue for later.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    Channel,
    client::{ChannelClients, send_guarded},
    error::{DispatchError, SystemError},
    policy::{RetryContext, RetryPolicy, RetrySummary},
    queue::{EnqueueOutcome, MessageQueue, QueueConfig, QueueItem, QueueStatus},
    rate_limiter::{RateLimitConfig, RateLimiter, RateLimiterStatus},
    service::DispatchQueryService,
    template::TemplateService,
    tracker::{JobStatistics, Outcome, SendTracker, Statistics},
    types::SendRequest,
};

/// Send path configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    /// Retry policy for direct sends
    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub templates: TemplateService,

    /// How long a send waits for a token before queueing
    ///
    /// Default: 0, never wait
    #[serde(default)]
    pub acquire_timeout_ms: u64,

    /// Queue sends that find no token; otherwise report them rate limited
    ///
    /// Default: true
    #[serde(default = "default_queue_on_rate_limit")]
    pub queue_on_rate_limit: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            rate_limits: RateLimitConfig::default(),
            queue: QueueConfig::default(),
            retry: RetryPolicy::default(),
            templates: TemplateService::default(),
            acquire_timeout_ms: 0,
            queue_on_rate_limit: default_queue_on_rate_limit(),
        }
    }
}

const fn default_queue_on_rate_limit() -> bool {
    true
}

/// Result of delivering one request
#[derive(Debug, Clone)]
pub struct Delivery {
    pub outcome: Outcome,
    /// Channel the outcome is attributed to
    pub channel: Channel,
    pub summary: RetrySummary,
}

/// Owns the shared dispatch components and runs the send path
pub struct Dispatcher {
    rate_limiter: Arc<RateLimiter>,
    queue: Arc<MessageQueue>,
    tracker: Arc<SendTracker>,
    clients: ChannelClients,
    templates: TemplateService,
    retry_policy: RetryPolicy,
    acquire_timeout: Duration,
    queue_on_rate_limit: bool,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("clients", &self.clients)
            .field("queue_capacity", &self.queue.capacity())
            .field("retry_policy", &self.retry_policy)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("queue_on_rate_limit", &self.queue_on_rate_limit)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Build every component from `config`
    #[must_use]
    pub fn new(config: DispatchConfig, clients: ChannelClients) -> Self {
        let capacity = config
            .queue
            .resolve_capacity(config.rate_limits.combined_per_minute());

        let rate_limiter = Arc::new(RateLimiter::with_all_channels(config.rate_limits.clone()));

        Self::with_components(
            config,
            clients,
            rate_limiter,
            Arc::new(MessageQueue::new(capacity)),
            Arc::new(SendTracker::new()),
        )
    }

    /// Use existing components, e.g. ones shared with another dispatcher
    ///
    /// The rate limit and queue sections of `config` are ignored; the
    /// components already carry their own.
    #[must_use]
    pub fn with_components(
        config: DispatchConfig,
        clients: ChannelClients,
        rate_limiter: Arc<RateLimiter>,
        queue: Arc<MessageQueue>,
        tracker: Arc<SendTracker>,
    ) -> Self {
        Self {
            rate_limiter,
            queue,
            tracker,
            clients,
            templates: config.templates,
            retry_policy: config.retry,
            acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
            queue_on_rate_limit: config.queue_on_rate_limit,
        }
    }

    #[must_use]
    pub const fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    #[must_use]
    pub const fn queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }

    #[must_use]
    pub const fn tracker(&self) -> &Arc<SendTracker> {
        &self.tracker
    }

    #[must_use]
    pub const fn clients(&self) -> &ChannelClients {
        &self.clients
    }

    /// Send now if the preferred channel has capacity, otherwise queue
    pub async fn enqueue_or_send(&self, request: SendRequest) -> Outcome {
        let channel = request.preferred_channel;

        if let Err(e) = request.validate() {
            warn!(
                recipient = %request.recipient_address,
                error = %e,
                "Rejected send before dispatch"
            );
            self.record(request.job_id.as_deref(), Outcome::InvalidRecipient, channel);
            return Outcome::InvalidRecipient;
        }

        if self.acquire(channel).await {
            let delivery = self.deliver(&request, &self.retry_policy).await;
            self.record(request.job_id.as_deref(), delivery.outcome, delivery.channel);
            return delivery.outcome;
        }

        if !self.queue_on_rate_limit {
            debug!(channel = %channel, "No capacity, not queueing");
            self.record(request.job_id.as_deref(), Outcome::RateLimited, channel);
            return Outcome::RateLimited;
        }

        let outcome = match self.queue.enqueue(QueueItem::from_request(&request)) {
            EnqueueOutcome::Queued { id, size } => {
                debug!(channel = %channel, item = %id, queue_size = size, "Queued send");
                Outcome::Queued
            }
            EnqueueOutcome::Full => {
                warn!(
                    channel = %channel,
                    capacity = self.queue.capacity(),
                    "Dispatch queue is full, send rejected"
                );
                Outcome::QueueFull
            }
        };

        self.record(request.job_id.as_deref(), outcome, channel);
        outcome
    }

    async fn acquire(&self, channel: Channel) -> bool {
        if self.acquire_timeout.is_zero() {
            self.rate_limiter.try_acquire(channel)
        } else {
            self.rate_limiter
                .acquire_within(channel, 1, self.acquire_timeout)
                .await
        }
    }

    /// Count an outcome globally and, when the send belongs to one, for its job
    pub(crate) fn record(&self, job_id: Option<&str>, outcome: Outcome, channel: Channel) {
        self.tracker.record_result(outcome, channel);
        if let Some(job_id) = job_id {
            self.tracker.record_job_result(job_id, outcome);
        }
    }

    /// Deliver a request whose preferred-channel token is already held.
    ///
    /// The preferred channel is tried under `policy`. When it is the primary
    /// channel and still fails, the fallback gets a single attempt if it
    /// reports itself available and has a token to spare.
    pub async fn deliver(&self, request: &SendRequest, policy: &RetryPolicy) -> Delivery {
        let preferred = request.preferred_channel;
        let mut ctx = RetryContext::new(request.clone(), policy.clone());

        if self.attempt_with_retries(&mut ctx, preferred).await {
            return Delivery {
                outcome: Outcome::PrimarySuccess,
                channel: preferred,
                summary: ctx.create_summary(),
            };
        }

        let fallback = preferred.fallback();
        if preferred.is_primary() && self.clients.is_available(fallback).await {
            if self.rate_limiter.try_acquire(fallback) {
                info!(
                    recipient = %request.recipient_address,
                    from = %preferred,
                    to = %fallback,
                    "Falling back"
                );

                if self.attempt_once(&mut ctx, fallback).await {
                    return Delivery {
                        outcome: Outcome::FallbackSuccess,
                        channel: fallback,
                        summary: ctx.create_summary(),
                    };
                }
            } else {
                debug!(channel = %fallback, "Fallback channel has no capacity");
            }
        }

        let summary = ctx.create_summary();
        warn!(
            recipient = %request.recipient_address,
            attempts = summary.total_attempts,
            last_error = summary.last_error.as_deref().unwrap_or("none"),
            "Send failed on every channel"
        );

        Delivery {
            outcome: Outcome::BothFailed,
            channel: summary.final_channel().unwrap_or(preferred),
            summary,
        }
    }

    /// Try `channel` until success, a non-retryable error or the policy gives up.
    ///
    /// The first attempt uses the token the caller holds; every retry takes a
    /// fresh one and stops retrying if none is left.
    async fn attempt_with_retries(&self, ctx: &mut RetryContext, channel: Channel) -> bool {
        loop {
            match self.attempt(ctx, channel).await {
                Ok(()) => return true,
                Err(e) if e.is_temporary() && ctx.should_retry() => {
                    let delay = ctx.next_delay();
                    debug!(
                        channel = %channel,
                        attempt = ctx.current_attempt(),
                        delay = ?delay,
                        "Retrying after temporary failure"
                    );
                    tokio::time::sleep(delay).await;

                    if !self.rate_limiter.try_acquire(channel) {
                        debug!(channel = %channel, "No capacity left for retry");
                        return false;
                    }
                }
                Err(_) => return false,
            }
        }
    }

    async fn attempt_once(&self, ctx: &mut RetryContext, channel: Channel) -> bool {
        self.attempt(ctx, channel).await.is_ok()
    }

    async fn attempt(&self, ctx: &mut RetryContext, channel: Channel) -> Result<(), DispatchError> {
        let attempt = ctx.start_new_attempt(channel);

        let Some(client) = self.clients.get(channel) else {
            let error: DispatchError =
                SystemError::NotInitialized(format!("no client registered for {channel}")).into();
            ctx.record_failure(&error);
            return Err(error);
        };

        let request = ctx.request();
        let body = self
            .templates
            .render(channel, &request.recipient_name, &request.body);
        let address = request.recipient_address.clone();

        let started = Instant::now();
        let result = send_guarded(client.as_ref(), &address, &body).await;
        let elapsed = started.elapsed();

        if let Some(metrics) = roster_metrics::try_metrics() {
            metrics.dispatch.record_channel_attempt(
                channel.as_str(),
                result.is_ok(),
                elapsed.as_secs_f64(),
            );
        }

        match result {
            Ok(receipt) => {
                roster_common::internal!(
                    "Sent to {} via {} as {} (attempt {})",
                    address,
                    channel,
                    receipt.message_id,
                    attempt
                );
                ctx.record_success(receipt.message_id);
                Ok(())
            }
            Err(e) => {
                warn!(
                    channel = %channel,
                    attempt,
                    recipient = %address,
                    error = %e,
                    "Send attempt failed"
                );
                ctx.record_failure(&e);
                Err(e)
            }
        }
    }
}

impl DispatchQueryService for Dispatcher {
    fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    fn rate_limiter_status(&self) -> RateLimiterStatus {
        self.rate_limiter.status()
    }

    fn statistics(&self) -> Statistics {
        self.tracker.statistics()
    }

    fn job_statistics(&self, job_id: &str) -> Option<JobStatistics> {
        self.tracker.job_statistics(job_id)
    }
}
