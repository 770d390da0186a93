//! Notification dispatch metrics
//!
//! Tracks:
//! - Terminal outcomes by kind and channel
//! - Calls to each channel endpoint, with their duration
//! - Queue occupancy
//! - Available tokens per channel
//! - Items dropped from the queue

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter},
};

use crate::MetricsError;

/// Dispatch metrics collector
#[derive(Debug)]
pub struct DispatchMetrics {
    /// Terminal outcomes by kind and channel
    outcomes_total: Counter<u64>,

    /// Calls made to channel endpoints by channel and result
    channel_attempts_total: Counter<u64>,

    /// Distribution of endpoint call durations by channel
    send_duration_seconds: Histogram<f64>,

    /// Queued items that left the queue without being delivered
    dropped_total: Counter<u64>,

    // Shared with the observable gauge callbacks
    queue_size: Arc<AtomicU64>,
    available_tokens: Arc<DashMap<String, f64>>,
}

impl DispatchMetrics {
    /// Create a new dispatch metrics collector
    ///
    /// # Errors
    ///
    /// Returns an error if metric instruments cannot be created.
    pub fn new() -> Result<Self, MetricsError> {
        let meter = meter();

        let outcomes_total = meter
            .u64_counter("roster.dispatch.outcomes.total")
            .with_description("Terminal send outcomes by kind and channel")
            .build();

        let channel_attempts_total = meter
            .u64_counter("roster.dispatch.channel.attempts.total")
            .with_description("Calls made to channel endpoints by result")
            .build();

        let send_duration_seconds = meter
            .f64_histogram("roster.dispatch.send.duration.seconds")
            .with_description("Distribution of channel endpoint call durations")
            .build();

        let dropped_total = meter
            .u64_counter("roster.dispatch.queue.dropped.total")
            .with_description("Queued items dropped without delivery, by reason")
            .build();

        let queue_size = Arc::new(AtomicU64::new(0));
        let available_tokens = Arc::new(DashMap::new());

        let size = queue_size.clone();
        meter
            .u64_observable_gauge("roster.dispatch.queue.size")
            .with_description("Number of items waiting in the dispatch queue")
            .with_callback(move |observer| {
                observer.observe(size.load(Ordering::Relaxed), &[]);
            })
            .build();

        let tokens: Arc<DashMap<String, f64>> = available_tokens.clone();
        meter
            .f64_observable_gauge("roster.dispatch.tokens.available")
            .with_description("Tokens currently available per channel")
            .with_callback(move |observer| {
                for entry in tokens.iter() {
                    observer.observe(*entry.value(), &[KeyValue::new("channel", entry.key().clone())]);
                }
            })
            .build();

        Ok(Self {
            outcomes_total,
            channel_attempts_total,
            send_duration_seconds,
            dropped_total,
            queue_size,
            available_tokens,
        })
    }

    /// Record a terminal outcome
    pub fn record_outcome(&self, outcome: &str, channel: &str) {
        let attributes = [
            KeyValue::new("outcome", outcome.to_string()),
            KeyValue::new("channel", channel.to_string()),
        ];
        self.outcomes_total.add(1, &attributes);
    }

    /// Record one call to a channel endpoint
    pub fn record_channel_attempt(&self, channel: &str, success: bool, duration_secs: f64) {
        let result = if success { "success" } else { "failure" };
        self.channel_attempts_total.add(
            1,
            &[
                KeyValue::new("channel", channel.to_string()),
                KeyValue::new("result", result),
            ],
        );
        self.send_duration_seconds
            .record(duration_secs, &[KeyValue::new("channel", channel.to_string())]);
    }

    /// Record a queued item that will never be delivered
    pub fn record_dropped(&self, reason: &str, count: u64) {
        self.dropped_total
            .add(count, &[KeyValue::new("reason", reason.to_string())]);
    }

    pub fn set_queue_size(&self, size: u64) {
        self.queue_size.store(size, Ordering::Relaxed);
    }

    #[must_use]
    pub fn queue_size(&self) -> u64 {
        self.queue_size.load(Ordering::Relaxed)
    }

    pub fn set_available_tokens(&self, channel: &str, tokens: f64) {
        self.available_tokens.insert(channel.to_string(), tokens);
    }

    #[must_use]
    pub fn available_tokens(&self, channel: &str) -> Option<f64> {
        self.available_tokens.get(channel).map(|v| *v)
    }
}

/// Get the OpenTelemetry meter for dispatch metrics
fn meter() -> Meter {
    opentelemetry::global::meter("roster.dispatch")
}
