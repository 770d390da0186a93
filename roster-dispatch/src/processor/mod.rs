//! Background queue processor
//!
//! Two independent timers drive the processor: the drain timer takes a
//! bounded batch from the queue and delivers what the rate limiter allows,
//! and the slower status timer reports queue and bucket occupancy.
//! Sends within a batch run in parallel, bounded by
//! `max_concurrent_deliveries`.

mod drain;
mod status;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use roster_common::{Signal, internal};
use serde::Deserialize;
use tokio::{
    task::{JoinError, JoinHandle},
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, warn};

pub use drain::DrainReport;

use crate::{dispatcher::Dispatcher, error::DispatchError};

const fn default_drain_interval_ms() -> u64 {
    5_000
}

const fn default_status_interval_secs() -> u64 {
    60
}

/// 50 every 5s keeps pace with the combined 600/min channel limits
const fn default_batch_size() -> usize {
    50
}

const fn default_shutdown_timeout_secs() -> u64 {
    30
}

const fn default_max_concurrent_deliveries() -> usize {
    16
}

/// Queue processor timing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,

    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,

    /// Maximum number of items taken from the queue per drain tick
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Give up on items that have waited longer than this
    ///
    /// Default: `None`, items wait indefinitely
    #[serde(default)]
    pub max_queue_age_secs: Option<u64>,

    /// How long shutdown waits for an in-flight drain
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Upper bound on sends in flight at once within a drained batch
    #[serde(default = "default_max_concurrent_deliveries")]
    pub max_concurrent_deliveries: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            drain_interval_ms: default_drain_interval_ms(),
            status_interval_secs: default_status_interval_secs(),
            batch_size: default_batch_size(),
            max_queue_age_secs: None,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            max_concurrent_deliveries: default_max_concurrent_deliveries(),
        }
    }
}

/// Drains the dispatch queue for the lifetime of the process
#[derive(Debug)]
pub struct QueueProcessor {
    config: ProcessorConfig,
    dispatcher: Arc<Dispatcher>,
    processing: AtomicBool,
}

impl QueueProcessor {
    #[must_use]
    pub const fn new(config: ProcessorConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            config,
            dispatcher,
            processing: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    #[must_use]
    pub const fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Whether a drain is currently running
    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    /// Run until a shutdown signal arrives
    ///
    /// Each drain runs as its own task so the status timer and the shutdown
    /// signal stay responsive while a batch is being delivered. At most one
    /// drain is in flight; ticks that land while one is running are skipped.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if either interval, the batch size or
    /// the delivery concurrency is zero.
    pub async fn serve(
        &self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), DispatchError> {
        if self.config.drain_interval_ms == 0
            || self.config.status_interval_secs == 0
            || self.config.batch_size == 0
            || self.config.max_concurrent_deliveries == 0
        {
            return Err(crate::error::SystemError::Configuration(
                "drain_interval_ms, status_interval_secs, batch_size and \
                 max_concurrent_deliveries must be non-zero"
                    .to_string(),
            )
            .into());
        }

        internal!(
            level = INFO,
            "Queue processor starting: {} items every {}ms, {} sends in parallel",
            self.config.batch_size,
            self.config.drain_interval_ms,
            self.config.max_concurrent_deliveries
        );

        let mut drain_timer =
            tokio::time::interval(Duration::from_millis(self.config.drain_interval_ms));
        drain_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut status_timer =
            tokio::time::interval(Duration::from_secs(self.config.status_interval_secs));

        // Skip the first tick to avoid immediate execution
        drain_timer.tick().await;
        status_timer.tick().await;

        let mut in_flight: Option<JoinHandle<DrainReport>> = None;

        loop {
            tokio::select! {
                _ = drain_timer.tick(), if in_flight.is_none() => {
                    self.processing.store(true, Ordering::SeqCst);
                    in_flight = Some(tokio::spawn(drain::drain(
                        Arc::clone(&self.dispatcher),
                        self.config.clone(),
                    )));
                }
                joined = async {
                    match in_flight.as_mut() {
                        Some(handle) => Some(handle.await),
                        None => None,
                    }
                }, if in_flight.is_some() => {
                    in_flight = None;
                    self.processing.store(false, Ordering::SeqCst);
                    if let Some(joined) = joined {
                        Self::log_drain(&joined);
                    }
                }
                _ = status_timer.tick() => {
                    self.report_status();
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!(level = INFO, "Queue processor received shutdown signal");
                            if let Some(handle) = in_flight.take() {
                                self.wait_for_in_flight(handle).await;
                            }
                            self.discard_remaining();
                            internal!(level = INFO, "Queue processor shutdown complete");
                            break;
                        }
                        Err(e) => {
                            error!("Queue processor shutdown channel error: {e}");
                            if let Some(handle) = in_flight.take() {
                                handle.abort();
                                self.processing.store(false, Ordering::SeqCst);
                            }
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn log_drain(joined: &Result<DrainReport, JoinError>) {
        match joined {
            Ok(report) if report.is_empty() => debug!("Drain tick, queue empty"),
            Ok(report) => info!(
                dequeued = report.dequeued,
                delivered = report.delivered,
                failed = report.failed,
                requeued = report.requeued,
                dropped = report.dropped,
                expired = report.expired,
                "Drained dispatch queue"
            ),
            Err(e) => error!(error = %e, "Drain task failed"),
        }
    }

    /// Give the in-flight drain up to the shutdown timeout, then abort it
    async fn wait_for_in_flight(&self, mut handle: JoinHandle<DrainReport>) {
        let timeout = Duration::from_secs(self.config.shutdown_timeout_secs);
        debug!(timeout_secs = timeout.as_secs(), "Waiting for in-flight drain to complete");

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(joined) => Self::log_drain(&joined),
            Err(_) => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "Shutdown timeout exceeded with a drain still in flight, aborting it"
                );
                handle.abort();
            }
        }

        self.processing.store(false, Ordering::SeqCst);
    }

    /// Queue state is volatile; whatever is left at shutdown is lost
    fn discard_remaining(&self) {
        let lost = self.dispatcher.queue().drain_all();
        if lost.is_empty() {
            return;
        }

        warn!(lost = lost.len(), "Discarding queued sends at shutdown");
        if let Some(metrics) = roster_metrics::try_metrics() {
            metrics
                .dispatch
                .record_dropped("shutdown", u64::try_from(lost.len()).unwrap_or(u64::MAX));
        }
    }
}
