use std::{
    collections::BTreeMap,
    path::Path,
    str::FromStr,
    sync::{Arc, LazyLock},
};

use anyhow::Context as _;
use roster_common::{Signal, internal, logging};
use roster_dispatch::{
    Channel, ChannelClients, ChannelRateLimit, DispatchConfig, DispatchQueryService, Dispatcher,
    Outcome, ProcessorConfig, QueueProcessor, QueueStatus, RetryPolicy, SendRequest, Statistics,
    client::{EndpointConfig, MessengerClient, SmsClient},
};
use roster_metrics::MetricsConfig;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Everything the host reads from its configuration file
#[derive(Debug, Default, Deserialize)]
pub struct Roster {
    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub processor: ProcessorConfig,

    #[serde(default)]
    pub messenger: EndpointConfig,

    #[serde(default)]
    pub sms: EndpointConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(s) => tracing::debug!("Received {s:?}"),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(e) => tracing::debug!("Received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}

impl FromStr for Roster {
    type Err = ron::error::SpannedError;

    /// Parse a configuration, allowing optional values without `Some(..)`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .from_str(s)
    }
}

/// Resolved view of a configuration, as printed by `roster check`
#[derive(Debug, Serialize)]
struct Resolved<'a> {
    limits: BTreeMap<Channel, ChannelRateLimit>,
    queue_capacity: usize,
    retry: &'a RetryPolicy,
    drain_interval_ms: u64,
    batch_size: usize,
    endpoints: BTreeMap<Channel, bool>,
    metrics: bool,
}

/// What a one-off send did
#[derive(Debug, Serialize)]
pub struct SendReport {
    pub outcome: Outcome,
    pub queue: QueueStatus,
    pub statistics: Statistics,
}

impl Roster {
    /// Read and parse the configuration at `path`
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not a valid configuration.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        content
            .parse()
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    fn endpoints(&self) -> [(Channel, &EndpointConfig); 2] {
        [(Channel::Messenger, &self.messenger), (Channel::Sms, &self.sms)]
    }

    /// Build the HTTP client for every channel
    ///
    /// # Errors
    ///
    /// Fails if an HTTP client cannot be constructed.
    pub fn build_clients(&self) -> anyhow::Result<ChannelClients> {
        for (channel, endpoint) in self.endpoints() {
            if !endpoint.is_configured() {
                tracing::warn!(channel = %channel, "No endpoint configured, channel will be unavailable");
            }
        }

        Ok(ChannelClients::new()
            .with(Arc::new(MessengerClient::new(self.messenger.clone())?))
            .with(Arc::new(SmsClient::new(self.sms.clone())?)))
    }

    #[must_use]
    pub fn build_dispatcher(&self, clients: ChannelClients) -> Dispatcher {
        Dispatcher::new(self.dispatch.clone(), clients)
    }

    /// Pretty-printed summary of what this configuration resolves to
    ///
    /// # Errors
    ///
    /// Fails if the summary cannot be serialised.
    pub fn describe(&self) -> anyhow::Result<String> {
        let limits = &self.dispatch.rate_limits;
        let resolved = Resolved {
            limits: Channel::ALL
                .iter()
                .map(|c| (*c, limits.limit_for(*c)))
                .collect(),
            queue_capacity: self
                .dispatch
                .queue
                .resolve_capacity(limits.combined_per_minute()),
            retry: &self.dispatch.retry,
            drain_interval_ms: self.processor.drain_interval_ms,
            batch_size: self.processor.batch_size,
            endpoints: self
                .endpoints()
                .into_iter()
                .map(|(c, e)| (c, e.enabled && e.is_configured()))
                .collect(),
            metrics: self.metrics.enabled,
        };

        Ok(ron::ser::to_string_pretty(
            &resolved,
            ron::ser::PrettyConfig::default(),
        )?)
    }

    /// Push a single request through a fresh dispatcher
    ///
    /// Nothing drains the queue here, so a queued request is lost when this returns.
    ///
    /// # Errors
    ///
    /// Fails if the channel clients cannot be built.
    pub async fn send(&self, request: SendRequest) -> anyhow::Result<SendReport> {
        let dispatcher = self.build_dispatcher(self.build_clients()?);
        let outcome = dispatcher.enqueue_or_send(request).await;

        if outcome == Outcome::Queued {
            tracing::warn!("Send was queued but no processor is running, it will not be delivered");
        }

        Ok(SendReport {
            outcome,
            queue: dispatcher.queue_status(),
            statistics: dispatcher.statistics(),
        })
    }

    /// Run the dispatcher and its queue processor until shutdown
    ///
    /// # Errors
    ///
    /// This function will return an error if metrics or the channel clients
    /// fail to initialise, or if the processor configuration is invalid.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();
        roster_metrics::init_metrics(&self.metrics)?;

        let dispatcher = Arc::new(self.build_dispatcher(self.build_clients()?));
        internal!(
            level = INFO,
            "Dispatcher running, queue capacity {}",
            dispatcher.queue().capacity()
        );

        let processor = QueueProcessor::new(self.processor, dispatcher);

        let ret = tokio::select! {
            r = processor.serve(SHUTDOWN_BROADCAST.subscribe()) => {
                r.map_err(anyhow::Error::from)
            }
            r = shutdown() => {
                r
            }
        };

        internal!(level = INFO, "Shutting down...");

        ret
    }
}
