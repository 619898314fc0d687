//! The main application logic, decoupled from the entry point.

use crate::{
    config::Config,
    core::Sender,
    dispatch::Dispatcher,
    intake::{self, IntakeStats},
    senders,
};
use anyhow::{Context, Result};
use metrics::Recorder;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncBufRead;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

/// A configured notifier with every sender registered and running.
pub struct App {
    dispatcher: Dispatcher,
}

impl App {
    /// Creates a new `AppBuilder` to construct an `App`.
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Feeds packages from `reader` to the dispatcher, then shuts it down.
    ///
    /// Intake stops at end of input or as soon as `shutdown_rx` turns true.
    /// In both cases queued packages are drained before this returns.
    pub async fn run<R>(self, reader: R, mut shutdown_rx: watch::Receiver<bool>) -> Result<IntakeStats>
    where
        R: AsyncBufRead + Unpin,
    {
        let stats = tokio::select! {
            biased;
            _ = shutdown_rx.wait_for(|stop| *stop) => {
                info!("Shutdown signal received, stopping intake.");
                None
            }
            result = intake::run(reader, &self.dispatcher) => Some(result),
        };

        self.dispatcher.shutdown().await;

        match stats {
            Some(result) => {
                let stats = result?;
                info!(
                    accepted = stats.accepted,
                    malformed = stats.malformed,
                    rejected = stats.rejected,
                    "Input finished."
                );
                Ok(stats)
            }
            None => Ok(IntakeStats::default()),
        }
    }
}

/// Builder for the main application.
///
/// Senders are created from configuration unless an override is supplied
/// for their identifier or type.
pub struct AppBuilder {
    config: Config,
    sender_overrides: HashMap<String, Box<dyn Sender>>,
    recorder_override: Option<Arc<dyn Recorder + Send + Sync>>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            sender_overrides: HashMap::new(),
            recorder_override: None,
        }
    }

    /// Uses `sender` for the configured block whose identifier or type is `key`.
    pub fn sender_override(mut self, key: impl Into<String>, sender: Box<dyn Sender>) -> Self {
        self.sender_overrides.insert(key.into(), sender);
        self
    }

    /// Records channel counters into `recorder` instead of the global recorder.
    pub fn recorder(mut self, recorder: Arc<dyn Recorder + Send + Sync>) -> Self {
        self.recorder_override = Some(recorder);
        self
    }

    /// Registers every configured sender, failing on the first bad block.
    #[instrument(skip_all)]
    pub fn build(mut self) -> Result<App> {
        let dispatch = &self.config.dispatch;
        let mut builder = Dispatcher::builder()
            .queue_capacity(dispatch.queue_capacity)
            .retry_policy(dispatch.retry.clone());
        if let Some(recorder) = self.recorder_override.take() {
            builder = builder.recorder(recorder);
        }
        let mut dispatcher = builder.build();

        for settings in &self.config.senders {
            let ident = settings.ident()?;
            let kind = settings.kind().unwrap_or_default();
            let sender = match self
                .sender_overrides
                .remove(&ident)
                .or_else(|| self.sender_overrides.remove(kind))
            {
                Some(sender) => sender,
                None => senders::from_settings(settings)?,
            };
            dispatcher
                .register_channel(ident.clone(), settings, sender)
                .with_context(|| format!("Failed to register sender [{ident}]"))?;
        }

        if !self.sender_overrides.is_empty() {
            let unused: Vec<_> = self.sender_overrides.keys().collect();
            warn!(?unused, "Sender overrides did not match any configured sender");
        }
        info!(
            senders = self.config.senders.len(),
            "Senders registered."
        );

        Ok(App { dispatcher })
    }
}
