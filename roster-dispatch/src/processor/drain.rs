use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::{ProcessorConfig, QueueProcessor};
use crate::{dispatcher::Dispatcher, policy::RetryPolicy, queue::QueueItem, tracker::Outcome};

/// What one drain tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub dequeued: usize,
    /// Sent on the preferred or the fallback channel
    pub delivered: usize,
    /// Sent to, but refused by, every channel tried
    pub failed: usize,
    /// Put back because the channel was still saturated
    pub requeued: usize,
    /// Could not be put back because the queue was full
    pub dropped: usize,
    /// Waited longer than the configured maximum age
    pub expired: usize,
}

impl DrainReport {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.dequeued == 0
    }
}

impl QueueProcessor {
    /// Take one batch from the queue and deliver what capacity allows.
    ///
    /// Items are sent with a single attempt on their preferred channel,
    /// plus one fallback attempt when that is the primary channel. Items
    /// whose channel has no token go back to the end of the queue.
    pub async fn drain_once(&self) -> DrainReport {
        drain(Arc::clone(self.dispatcher()), self.config().clone()).await
    }
}

/// One drain tick, owning everything it touches so it can run as its own task
pub(super) async fn drain(dispatcher: Arc<Dispatcher>, config: ProcessorConfig) -> DrainReport {
    let batch = dispatcher.queue().dequeue_batch(config.batch_size);

    let mut report = DrainReport {
        dequeued: batch.len(),
        ..DrainReport::default()
    };

    // Expiry and token accounting stay sequential; only sends run in parallel
    let mut ready = Vec::with_capacity(batch.len());
    for item in batch {
        if is_expired(&config, &item) {
            warn!(
                item = %item.id,
                channel = %item.preferred_channel,
                retry_count = item.retry_count,
                "Queued send expired before capacity became available"
            );
            dispatcher.record(item.job_id.as_deref(), Outcome::RateLimited, item.preferred_channel);
            record_dropped("expired");
            report.expired += 1;
            continue;
        }

        if dispatcher.rate_limiter().try_acquire(item.preferred_channel) {
            ready.push(item);
        } else {
            requeue(&dispatcher, item, &mut report);
        }
    }

    deliver_all(&dispatcher, ready, config.max_concurrent_deliveries.max(1), &mut report).await;

    if let Some(metrics) = roster_metrics::try_metrics() {
        metrics
            .dispatch
            .set_queue_size(u64::try_from(dispatcher.queue().len()).unwrap_or(u64::MAX));
    }

    report
}

/// Deliver token-holding items with at most `max_concurrent` sends in flight
async fn deliver_all(
    dispatcher: &Arc<Dispatcher>,
    items: Vec<QueueItem>,
    max_concurrent: usize,
    report: &mut DrainReport,
) {
    if items.is_empty() {
        return;
    }

    debug!(
        ready = items.len(),
        max_concurrent, "Delivering drained items with parallel workers"
    );

    let mut join_set: JoinSet<Outcome> = JoinSet::new();
    let mut pending = items.into_iter();

    for item in pending.by_ref().take(max_concurrent) {
        join_set.spawn(deliver_one(Arc::clone(dispatcher), item));
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(outcome) if outcome.is_delivered() => report.delivered += 1,
            Ok(_) => report.failed += 1,
            Err(e) => {
                warn!(error = %e, "Drained send task did not complete");
                report.failed += 1;
            }
        }

        if let Some(item) = pending.next() {
            join_set.spawn(deliver_one(Arc::clone(dispatcher), item));
        }
    }
}

async fn deliver_one(dispatcher: Arc<Dispatcher>, item: QueueItem) -> Outcome {
    let request = item.to_request();
    let delivery = dispatcher.deliver(&request, &RetryPolicy::none()).await;
    dispatcher.record(request.job_id.as_deref(), delivery.outcome, delivery.channel);
    delivery.outcome
}

fn is_expired(config: &ProcessorConfig, item: &QueueItem) -> bool {
    config.max_queue_age_secs.is_some_and(|max| {
        let max = chrono::Duration::seconds(i64::try_from(max).unwrap_or(i64::MAX));
        item.age(Utc::now()) > max
    })
}

fn requeue(dispatcher: &Dispatcher, item: QueueItem, report: &mut DrainReport) {
    let channel = item.preferred_channel;

    match dispatcher.queue().requeue(item) {
        Ok(size) => {
            debug!(channel = %channel, queue_size = size, "Channel still saturated, requeued");
            report.requeued += 1;
        }
        Err(item) => {
            warn!(
                item = %item.id,
                channel = %channel,
                "Queue full while requeueing, dropping send"
            );
            dispatcher.record(item.job_id.as_deref(), Outcome::QueueFull, channel);
            record_dropped("queue_full");
            report.dropped += 1;
        }
    }
}

fn record_dropped(reason: &str) {
    if let Some(metrics) = roster_metrics::try_metrics() {
        metrics.dispatch.record_dropped(reason, 1);
    }
}
