//! Policy abstractions for send operations.
//!
//! - [`RetryPolicy`]: Determines whether a send may be retried, and after how long
//! - [`RetryContext`]: Records the attempts made for a single send

pub mod context;
pub mod retry;

pub use context::{RetryAttempt, RetryContext, RetrySummary};
pub use retry::{RetryPolicy, RetryPolicyBuilder, RetryPolicyError, RetryPreset};
