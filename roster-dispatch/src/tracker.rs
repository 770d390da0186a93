//! Outcome statistics, globally and per bulk job.
//!
//! Counters are plain atomics so that recording never takes a lock shared
//! between channels. Rates are never stored: [`SendTracker::statistics`]
//! recomputes them from the raw counts on every read.

use std::{
    collections::BTreeMap,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::Channel;

/// Terminal classification of a send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Delivered on the preferred channel
    PrimarySuccess,
    /// Preferred channel failed, delivered on the fallback
    FallbackSuccess,
    BothFailed,
    /// No capacity and not queued
    RateLimited,
    /// Accepted for later delivery
    Queued,
    /// No capacity and no room in the queue
    QueueFull,
    InvalidRecipient,
}

impl Outcome {
    pub const ALL: [Self; 7] = [
        Self::PrimarySuccess,
        Self::FallbackSuccess,
        Self::BothFailed,
        Self::RateLimited,
        Self::Queued,
        Self::QueueFull,
        Self::InvalidRecipient,
    ];

    /// Counted as success in aggregate rates.
    ///
    /// Queued work is counted optimistically; use the outcome itself to
    /// tell confirmed deliveries apart from accepted ones.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(
            self,
            Self::PrimarySuccess | Self::FallbackSuccess | Self::Queued
        )
    }

    /// Whether the message has actually been handed to an endpoint
    #[must_use]
    pub const fn is_delivered(self) -> bool {
        matches!(self, Self::PrimarySuccess | Self::FallbackSuccess)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PrimarySuccess => "primary_success",
            Self::FallbackSuccess => "fallback_success",
            Self::BothFailed => "both_failed",
            Self::RateLimited => "rate_limited",
            Self::Queued => "queued",
            Self::QueueFull => "queue_full",
            Self::InvalidRecipient => "invalid_recipient",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const OUTCOMES: usize = Outcome::ALL.len();
const CHANNELS: usize = Channel::ALL.len();

const fn channel_index(channel: Channel) -> usize {
    match channel {
        Channel::Messenger => 0,
        Channel::Sms => 1,
    }
}

/// Percentage of `part` in `total`, rounded to one decimal place
#[allow(clippy::cast_precision_loss)]
fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64 * 1000.0).round() / 10.0
}

/// Derived rates over a set of outcome counts
fn rates(counts: &[u64; OUTCOMES]) -> (u64, f64, f64) {
    let total: u64 = counts.iter().sum();
    let successes: u64 = Outcome::ALL
        .iter()
        .filter(|o| o.is_success())
        .map(|o| counts[o.index()])
        .sum();
    let fallbacks = counts[Outcome::FallbackSuccess.index()];

    (total, percent(successes, total), percent(fallbacks, total))
}

fn by_outcome(counts: &[u64; OUTCOMES]) -> BTreeMap<Outcome, u64> {
    Outcome::ALL.iter().map(|o| (*o, counts[o.index()])).collect()
}

/// Snapshot of global counters and the rates derived from them
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub total: u64,
    /// Every recorded result, including ones not attributed to an outcome
    pub total_attempts: u64,
    pub by_outcome: BTreeMap<Outcome, u64>,
    pub by_channel: BTreeMap<Channel, u64>,
    /// Percentage, one decimal
    pub success_rate: f64,
    /// Percentage, one decimal
    pub fallback_rate: f64,
}

impl Statistics {
    #[must_use]
    pub fn count(&self, outcome: Outcome) -> u64 {
        self.by_outcome.get(&outcome).copied().unwrap_or_default()
    }
}

/// Snapshot of a single job's counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatistics {
    pub job_id: String,
    pub total: u64,
    pub by_outcome: BTreeMap<Outcome, u64>,
    pub success_rate: f64,
    pub fallback_rate: f64,
    pub first_recorded_at: DateTime<Utc>,
    pub last_recorded_at: DateTime<Utc>,
}

impl JobStatistics {
    #[must_use]
    pub fn count(&self, outcome: Outcome) -> u64 {
        self.by_outcome.get(&outcome).copied().unwrap_or_default()
    }
}

#[derive(Debug)]
struct JobCounters {
    counts: [u64; OUTCOMES],
    first_recorded_at: DateTime<Utc>,
    last_recorded_at: DateTime<Utc>,
}

impl JobCounters {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            counts: [0; OUTCOMES],
            first_recorded_at: now,
            last_recorded_at: now,
        }
    }
}

/// Process-wide outcome counters
#[derive(Debug, Default)]
pub struct SendTracker {
    outcomes: [AtomicU64; OUTCOMES],
    channels: [AtomicU64; CHANNELS],
    total_attempts: AtomicU64,
    jobs: DashMap<String, JobCounters>,
}

impl SendTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one terminal outcome attributed to `channel`
    pub fn record_result(&self, outcome: Outcome, channel: Channel) {
        self.outcomes[outcome.index()].fetch_add(1, Ordering::Relaxed);
        self.channels[channel_index(channel)].fetch_add(1, Ordering::Relaxed);
        self.total_attempts.fetch_add(1, Ordering::Relaxed);

        if let Some(metrics) = roster_metrics::try_metrics() {
            metrics
                .dispatch
                .record_outcome(outcome.as_str(), channel.as_str());
        }
    }

    /// Count one outcome against `job_id`, creating the job on first use
    ///
    /// Only the job bucket is touched; call [`record_result`](Self::record_result)
    /// as well for the global counters.
    pub fn record_job_result(&self, job_id: &str, outcome: Outcome) {
        let mut job = self
            .jobs
            .entry(job_id.to_string())
            .or_insert_with(JobCounters::new);
        job.counts[outcome.index()] += 1;
        job.last_recorded_at = Utc::now();
    }

    pub fn count(&self, outcome: Outcome) -> u64 {
        self.outcomes[outcome.index()].load(Ordering::Relaxed)
    }

    pub fn channel_count(&self, channel: Channel) -> u64 {
        self.channels[channel_index(channel)].load(Ordering::Relaxed)
    }

    pub fn statistics(&self) -> Statistics {
        let counts: [u64; OUTCOMES] =
            std::array::from_fn(|i| self.outcomes[i].load(Ordering::Relaxed));
        let (total, success_rate, fallback_rate) = rates(&counts);

        Statistics {
            total,
            total_attempts: self.total_attempts.load(Ordering::Relaxed),
            by_outcome: by_outcome(&counts),
            by_channel: Channel::ALL
                .iter()
                .map(|c| (*c, self.channel_count(*c)))
                .collect(),
            success_rate,
            fallback_rate,
        }
    }

    pub fn job_statistics(&self, job_id: &str) -> Option<JobStatistics> {
        self.jobs.get(job_id).map(|job| {
            let (total, success_rate, fallback_rate) = rates(&job.counts);
            JobStatistics {
                job_id: job_id.to_string(),
                total,
                by_outcome: by_outcome(&job.counts),
                success_rate,
                fallback_rate,
                first_recorded_at: job.first_recorded_at,
                last_recorded_at: job.last_recorded_at,
            }
        })
    }

    pub fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.jobs.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn remove_job(&self, job_id: &str) -> Option<JobStatistics> {
        let stats = self.job_statistics(job_id);
        self.jobs.remove(job_id);
        stats
    }

    /// Zero every counter and forget every job
    pub fn reset(&self) {
        for counter in self.outcomes.iter().chain(self.channels.iter()) {
            counter.store(0, Ordering::Relaxed);
        }
        self.total_attempts.store(0, Ordering::Relaxed);
        self.jobs.clear();
    }
}
