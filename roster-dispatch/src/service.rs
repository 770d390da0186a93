//! Read-only query access to dispatch state
//!
//! Callers that only report on dispatch (status endpoints, admin screens)
//! depend on this trait rather than on the concrete
//! [`Dispatcher`](crate::Dispatcher).

use crate::{
    queue::QueueStatus,
    rate_limiter::RateLimiterStatus,
    tracker::{JobStatistics, Statistics},
};

/// Snapshot queries over queue, rate limiter and tracker state
///
/// # Example
///
/// ```rust,ignore
/// fn is_saturated(service: &dyn DispatchQueryService) -> bool {
///     service.queue_status().is_full
/// }
/// ```
pub trait DispatchQueryService: Send + Sync {
    /// Occupancy of the dispatch queue
    fn queue_status(&self) -> QueueStatus;

    /// Available tokens and usage per channel
    fn rate_limiter_status(&self) -> RateLimiterStatus;

    /// Global outcome counters and derived rates
    fn statistics(&self) -> Statistics;

    /// Counters for a single job
    ///
    /// Returns `None` if nothing has been recorded for `job_id`.
    fn job_statistics(&self, job_id: &str) -> Option<JobStatistics>;
}
