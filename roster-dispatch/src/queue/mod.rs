//! Bounded FIFO for sends that are waiting on channel capacity

mod item;

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub use item::QueueItem;

use crate::Channel;

/// Queue sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Explicit maximum number of queued items
    ///
    /// Default: `None`, derived from `capacity_factor`
    #[serde(default)]
    pub capacity: Option<usize>,

    /// Multiple of the combined per-minute channel limits to hold
    ///
    /// Default: 2.5
    #[serde(default = "default_capacity_factor")]
    pub capacity_factor: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: None,
            capacity_factor: default_capacity_factor(),
        }
    }
}

const fn default_capacity_factor() -> f64 {
    2.5
}

impl QueueConfig {
    /// Resolve the capacity for a combined per-minute throughput
    #[must_use]
    pub fn resolve_capacity(&self, combined_per_minute: f64) -> usize {
        self.capacity.unwrap_or_else(|| {
            let factor = self.capacity_factor.max(0.0);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let capacity = (combined_per_minute.max(0.0) * factor).round() as usize;
            capacity
        })
    }
}

/// Result of offering an item to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued { id: Ulid, size: usize },
    Full,
}

impl EnqueueOutcome {
    #[must_use]
    pub const fn is_queued(&self) -> bool {
        matches!(self, Self::Queued { .. })
    }
}

/// Point-in-time view of queue occupancy
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QueueStatus {
    pub current_size: usize,
    pub max_size: usize,
    pub usage_percent: f64,
    pub is_full: bool,
}

/// Bounded, strictly FIFO message queue
///
/// Every operation takes the lock for a single push or pop and returns
/// immediately; nothing here ever waits for space or for items.
#[derive(Debug)]
pub struct MessageQueue {
    items: Mutex<VecDeque<QueueItem>>,
    capacity: usize,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

impl MessageQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
        }
    }

    /// Size the queue from the built-in channel limits
    #[must_use]
    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.resolve_capacity(f64::from(
            Channel::combined_per_minute_limit(),
        )))
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Offer an item at the back of the queue
    pub fn enqueue(&self, item: QueueItem) -> EnqueueOutcome {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return EnqueueOutcome::Full;
        }

        let id = item.id;
        items.push_back(item);
        EnqueueOutcome::Queued {
            id,
            size: items.len(),
        }
    }

    /// Put an item that could not be sent back at the end of the line
    ///
    /// # Errors
    ///
    /// Hands the item back when the queue has no room for it.
    pub fn requeue(&self, mut item: QueueItem) -> Result<usize, QueueItem> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(item);
        }

        item.retry_count = item.retry_count.saturating_add(1);
        items.push_back(item);
        Ok(items.len())
    }

    /// Take the oldest item
    pub fn dequeue(&self) -> Option<QueueItem> {
        self.items.lock().pop_front()
    }

    /// Take up to `max` of the oldest items
    pub fn dequeue_batch(&self, max: usize) -> Vec<QueueItem> {
        let mut items = self.items.lock();
        let n = max.min(items.len());
        items.drain(..n).collect()
    }

    /// Remove and return everything still queued
    pub fn drain_all(&self) -> Vec<QueueItem> {
        self.items.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn status(&self) -> QueueStatus {
        let current_size = self.len();
        #[allow(clippy::cast_precision_loss)]
        let usage_percent = if self.capacity == 0 {
            100.0
        } else {
            current_size as f64 / self.capacity as f64 * 100.0
        };

        QueueStatus {
            current_size,
            max_size: self.capacity,
            usage_percent,
            is_full: current_size >= self.capacity,
        }
    }
}
