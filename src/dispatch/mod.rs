//! Per-channel dispatch of notification packages.
//!
//! The [`Dispatcher`] owns one bounded queue and one worker task per
//! registered channel. Producers push packages onto a channel's queue, the
//! worker hands them to the channel's [`Sender`], and failures are routed to
//! the resend path. Shutdown closes every queue and waits for every worker to
//! drain.

pub mod resend;
mod worker;

use crate::config::DispatchConfig;
use crate::core::{NotificationPackage, Sender, SenderError, SenderSettings};
use crate::internal_metrics::ChannelMetrics;
use crate::task_manager::TaskManager;
use metrics::Recorder;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, info_span, Instrument};

pub use resend::RetryPolicy;
use resend::{Resender, RetryTracker};
use worker::ChannelWorker;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("sender settings have no `type` key")]
    MissingType,

    #[error("script sender settings have no `name` key")]
    MissingName,

    #[error("unknown sender type [{0}]")]
    UnknownSenderType(String),

    #[error("sender [{0}] is already registered")]
    AlreadyRegistered(String),

    #[error("Don't initialize sender [{ident}], err [{source}]")]
    Init {
        ident: String,
        #[source]
        source: SenderError,
    },

    #[error("no sender registered for channel [{0}]")]
    UnknownChannel(String),

    #[error("channel [{0}] is closed")]
    ChannelClosed(String),
}

struct Channel {
    queue: async_channel::Sender<NotificationPackage>,
    metrics: ChannelMetrics,
}

/// Registry of delivery channels and the entry point for producers.
///
/// Registration takes `&mut self`, so it is finished before the dispatcher
/// can be shared with producers.
pub struct Dispatcher {
    channels: HashMap<String, Channel>,
    tasks: TaskManager,
    pending_retries: RetryTracker,
    retry_policy: RetryPolicy,
    queue_capacity: usize,
    recorder: Option<Arc<dyn Recorder + Send + Sync>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::builder()
            .queue_capacity(config.queue_capacity)
            .retry_policy(config.retry.clone())
            .build()
    }

    /// Registers a sender under the identifier derived from its settings.
    pub fn register(
        &mut self,
        settings: &SenderSettings,
        sender: Box<dyn Sender>,
    ) -> Result<String, DispatchError> {
        let ident = settings.ident()?;
        self.register_channel(ident.clone(), settings, sender)?;
        Ok(ident)
    }

    /// Initializes `sender` and starts the worker for channel `ident`.
    ///
    /// Fails without creating a queue or a worker when the identifier is
    /// already taken or the sender rejects its settings.
    pub fn register_channel(
        &mut self,
        ident: impl Into<String>,
        settings: &SenderSettings,
        mut sender: Box<dyn Sender>,
    ) -> Result<(), DispatchError> {
        let ident = ident.into();
        if self.channels.contains_key(&ident) {
            return Err(DispatchError::AlreadyRegistered(ident));
        }

        let span = info_span!("sender", channel = %ident);
        sender
            .init(settings, &span)
            .map_err(|source| DispatchError::Init {
                ident: ident.clone(),
                source,
            })?;

        let (queue_tx, queue_rx) = async_channel::bounded(self.queue_capacity);
        let metrics = match &self.recorder {
            Some(recorder) => ChannelMetrics::register_with(recorder.as_ref(), &ident),
            None => ChannelMetrics::register(&ident),
        };

        let shared_ident: Arc<str> = Arc::from(ident.as_str());
        let resender = Resender::new(
            shared_ident.clone(),
            queue_tx.clone(),
            self.retry_policy.clone(),
            metrics.clone(),
            self.pending_retries.clone(),
            self.shutdown_tx.subscribe(),
        );
        let worker = ChannelWorker::new(shared_ident, sender, queue_rx, metrics.clone(), resender);
        self.tasks
            .spawn(format!("sender:{ident}"), worker.run().instrument(span));

        debug!("Sender {} registered", ident);
        self.channels.insert(
            ident,
            Channel {
                queue: queue_tx,
                metrics,
            },
        );
        Ok(())
    }

    /// Hands `pkg` to the worker of channel `ident`.
    ///
    /// Waits while the channel's queue is full.
    pub async fn dispatch(&self, ident: &str, pkg: NotificationPackage) -> Result<(), DispatchError> {
        let channel = self
            .channels
            .get(ident)
            .ok_or_else(|| DispatchError::UnknownChannel(ident.to_string()))?;
        channel
            .queue
            .send(pkg)
            .await
            .map_err(|_| DispatchError::ChannelClosed(ident.to_string()))
    }

    /// Dispatches `pkg` to the channel named by its contact type.
    pub async fn dispatch_package(&self, pkg: NotificationPackage) -> Result<(), DispatchError> {
        let ident = pkg.contact.kind.clone();
        self.dispatch(&ident, pkg).await
    }

    pub fn is_registered(&self, ident: &str) -> bool {
        self.channels.contains_key(ident)
    }

    /// Identifiers of all registered channels.
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    /// Counters of a registered channel.
    pub fn channel_metrics(&self, ident: &str) -> Option<&ChannelMetrics> {
        self.channels.get(ident).map(|channel| &channel.metrics)
    }

    /// Closes every queue and waits until every worker has drained it and exited.
    ///
    /// Retries that are still waiting for their backoff delay are abandoned
    /// and counted as failed sends.
    pub async fn shutdown(mut self) {
        info!("Stopping {} senders", self.channels.len());
        self.close_all();

        debug!("Waiting senders finish ...");
        std::mem::take(&mut self.tasks).shutdown().await;
        self.pending_retries.join_all().await;
        info!("All senders stopped");
    }

    fn close_all(&self) {
        self.shutdown_tx.send_replace(true);
        for channel in self.channels.values() {
            channel.queue.close();
        }
    }
}

/// A dispatcher dropped without [`Dispatcher::shutdown`] still closes its
/// queues, so its workers drain and exit on their own.
impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.close_all();
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for a [`Dispatcher`].
#[derive(Default)]
pub struct DispatcherBuilder {
    queue_capacity: Option<usize>,
    retry_policy: RetryPolicy,
    recorder: Option<Arc<dyn Recorder + Send + Sync>>,
}

impl DispatcherBuilder {
    /// Capacity of each channel queue. Values below 1 are raised to 1.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Registers channel counters with `recorder` instead of the global recorder.
    pub fn recorder(mut self, recorder: Arc<dyn Recorder + Send + Sync>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn build(self) -> Dispatcher {
        let (shutdown_tx, _) = watch::channel(false);
        Dispatcher {
            channels: HashMap::new(),
            tasks: TaskManager::new(),
            pending_retries: RetryTracker::default(),
            retry_policy: self.retry_policy,
            queue_capacity: self.queue_capacity.unwrap_or(1).max(1),
            recorder: self.recorder,
            shutdown_tx,
        }
    }
}
