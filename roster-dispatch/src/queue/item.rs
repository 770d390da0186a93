use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::{Channel, types::SendRequest};

/// A send that could not be made immediately
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Ulid,
    pub recipient_name: String,
    pub recipient_address: String,
    pub body: String,
    pub preferred_channel: Channel,
    pub queued_at: DateTime<Utc>,
    /// Number of times the item went back into the queue
    pub retry_count: u32,
    pub job_id: Option<String>,
}

impl QueueItem {
    #[must_use]
    pub fn from_request(request: &SendRequest) -> Self {
        Self {
            id: Ulid::new(),
            recipient_name: request.recipient_name.clone(),
            recipient_address: request.recipient_address.clone(),
            body: request.body.clone(),
            preferred_channel: request.preferred_channel,
            queued_at: Utc::now(),
            retry_count: 0,
            job_id: request.job_id.clone(),
        }
    }

    /// Rebuild the request this item was queued for
    #[must_use]
    pub fn to_request(&self) -> SendRequest {
        SendRequest {
            recipient_name: self.recipient_name.clone(),
            recipient_address: self.recipient_address.clone(),
            body: self.body.clone(),
            preferred_channel: self.preferred_channel,
            job_id: self.job_id.clone(),
        }
    }

    /// Time spent waiting since the item was first queued
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.queued_at
    }
}
