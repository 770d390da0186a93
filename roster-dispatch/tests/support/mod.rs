//! In-memory channel clients for exercising the send path

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use roster_dispatch::{Channel, ChannelClient, ChannelClients, ChannelError, SendReceipt};

/// What a scripted client does for one call
#[derive(Debug, Clone)]
pub enum Behaviour {
    Succeed,
    /// Remote 5xx, retried
    ServerError,
    /// Explicit refusal, not retried
    Reject,
    Panic,
    /// Succeed after holding the call open
    Slow(Duration),
}

/// A channel client that follows a script, then repeats a default behaviour
pub struct ScriptedClient {
    channel: Channel,
    available: AtomicBool,
    default: Behaviour,
    script: Mutex<VecDeque<Behaviour>>,
    calls: AtomicUsize,
    sent: Mutex<Vec<(String, String)>>,
}

impl ScriptedClient {
    pub fn new(channel: Channel, default: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            channel,
            available: AtomicBool::new(true),
            default,
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn succeeding(channel: Channel) -> Arc<Self> {
        Self::new(channel, Behaviour::Succeed)
    }

    pub fn failing(channel: Channel) -> Arc<Self> {
        Self::new(channel, Behaviour::ServerError)
    }

    pub fn then(self: &Arc<Self>, behaviour: Behaviour) -> Arc<Self> {
        self.script.lock().push_back(behaviour);
        self.clone()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `(recipient, body)` of every call, successful or not
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ChannelClient for ScriptedClient {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, recipient_address: &str, body: &str) -> Result<SendReceipt, ChannelError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.sent
            .lock()
            .push((recipient_address.to_string(), body.to_string()));

        let behaviour = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());

        match behaviour {
            Behaviour::Succeed => Ok(SendReceipt {
                channel: self.channel,
                message_id: format!("{}-{n}", self.channel.as_str()),
            }),
            Behaviour::ServerError => Err(ChannelError::Status {
                status: 503,
                body: "unavailable".to_string(),
            }),
            Behaviour::Reject => Err(ChannelError::Rejected {
                code: "BLOCKED".to_string(),
                message: "recipient blocked sender".to_string(),
            }),
            Behaviour::Panic => panic!("scripted client panic"),
            Behaviour::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(SendReceipt {
                    channel: self.channel,
                    message_id: format!("{}-{n}", self.channel.as_str()),
                })
            }
        }
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

pub fn clients(messenger: &Arc<ScriptedClient>, sms: &Arc<ScriptedClient>) -> ChannelClients {
    ChannelClients::new()
        .with(messenger.clone())
        .with(sms.clone())
}
