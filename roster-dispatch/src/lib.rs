//! Rate-limited notification dispatch
//!
//! This crate provides:
//! - Per-channel token bucket rate limiting
//! - Direct sends with retry and fallback between channels
//! - A bounded queue for sends that find no capacity, and its drain loop
//! - Outcome statistics, globally and per bulk job

mod channel;
pub mod client;
mod dispatcher;
mod error;
pub mod policy;
pub mod processor;
pub mod queue;
mod rate_limiter;
mod service;
mod template;
mod tracker;
mod types;

pub use channel::{Channel, UnknownChannel};
pub use client::{ChannelClient, ChannelClients, ChannelError, SendReceipt};
pub use dispatcher::{Delivery, DispatchConfig, Dispatcher};
pub use error::{DispatchError, PermanentError, SystemError, TemporaryError};
pub use policy::{RetryAttempt, RetryContext, RetryPolicy, RetryPolicyError, RetrySummary};
pub use processor::{DrainReport, ProcessorConfig, QueueProcessor};
pub use queue::{EnqueueOutcome, MessageQueue, QueueConfig, QueueItem, QueueStatus};
pub use rate_limiter::{
    BucketStatus, ChannelRateLimit, RateLimitConfig, RateLimiter, RateLimiterStatus, TokenBucket,
};
pub use service::DispatchQueryService;
pub use template::{MessageTemplate, TemplateService};
pub use tracker::{JobStatistics, Outcome, SendTracker, Statistics};
pub use types::{MAX_BODY_LENGTH, SendRequest};
