use tracing::info;

use super::QueueProcessor;
use crate::service::DispatchQueryService;

impl QueueProcessor {
    /// Log queue and bucket occupancy and publish it to the gauges
    pub fn report_status(&self) {
        let queue = self.dispatcher().queue_status();
        let limiter = self.dispatcher().rate_limiter_status();

        info!(
            queue_size = queue.current_size,
            max_size = queue.max_size,
            usage_percent = queue.usage_percent,
            "Dispatch queue status"
        );

        for (channel, bucket) in &limiter.channels {
            info!(
                channel = %channel,
                available = bucket.available_tokens,
                capacity = bucket.capacity,
                usage_rate = bucket.usage_rate,
                "Rate limiter status"
            );
        }

        if let Some(metrics) = roster_metrics::try_metrics() {
            metrics
                .dispatch
                .set_queue_size(u64::try_from(queue.current_size).unwrap_or(u64::MAX));
            for (channel, bucket) in &limiter.channels {
                metrics
                    .dispatch
                    .set_available_tokens(channel.as_str(), bucket.available_tokens);
            }
        }
    }
}
