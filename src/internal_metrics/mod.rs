//! # Internal Metrics Module
//!
//! Delivery health is observed exclusively through per-channel counters.
//!
//! ## Components:
//!
//! - **`ChannelMetrics`**: The pair of counters (`sends_ok`, `sends_failed`)
//!   owned by one registered channel.
//!
//! - **`MetricsBuilder`**: Installs a global recorder for the binary. Either a
//!   Prometheus recorder exposed by the `MetricsServer`, or the
//!   `LoggingRecorder` that periodically prints every counter.

use crate::config::MetricsConfig;
use crate::internal_metrics::logging_recorder::LoggingRecorder;
use crate::internal_metrics::server::MetricsServer;
use crate::task_manager::TaskManager;
use anyhow::{anyhow, Context, Result};
use metrics::{Counter, Recorder, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

pub mod logging_recorder;
pub mod server;

/// Makes a channel identifier safe to use as a metrics path segment.
pub fn metrics_ident(ident: &str) -> String {
    ident.replace(' ', "_")
}

/// Success and terminal-failure counters for one channel.
#[derive(Clone)]
pub struct ChannelMetrics {
    pub sends_ok: Counter,
    pub sends_failed: Counter,
}

impl std::fmt::Debug for ChannelMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelMetrics").finish_non_exhaustive()
    }
}

impl ChannelMetrics {
    /// Registers the counters for `ident` with the global recorder.
    pub fn register(ident: &str) -> Self {
        let prefix = metrics_ident(ident);
        let ok_name = format!("{prefix}.sends_ok");
        let failed_name = format!("{prefix}.sends_failed");

        metrics::describe_counter!(
            ok_name.clone(),
            Unit::Count,
            "Notification packages delivered successfully on this channel."
        );
        metrics::describe_counter!(
            failed_name.clone(),
            Unit::Count,
            "Notification packages dropped after exhausting their retries on this channel."
        );

        Self {
            sends_ok: metrics::counter!(ok_name),
            sends_failed: metrics::counter!(failed_name),
        }
    }

    /// Registers the counters for `ident` with an explicit recorder.
    ///
    /// The returned handles stay bound to `recorder` after this call returns.
    pub fn register_with(recorder: &dyn Recorder, ident: &str) -> Self {
        metrics::with_local_recorder(recorder, || Self::register(ident))
    }
}

/// Builder for the binary's metrics exporter.
pub struct MetricsBuilder {
    config: MetricsConfig,
}

impl MetricsBuilder {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    /// Installs the global recorder and spawns its background tasks.
    ///
    /// Returns the address of the `/metrics` endpoint when the Prometheus
    /// exporter is enabled.
    pub async fn build(
        self,
        task_manager: &TaskManager,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Option<SocketAddr>> {
        if self.config.enabled {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();

            let listener = TcpListener::bind(self.config.listen_address)
                .await
                .with_context(|| {
                    format!(
                        "Failed to bind metrics server to {}",
                        self.config.listen_address
                    )
                })?;
            let addr = listener.local_addr()?;

            metrics::set_global_recorder(recorder)
                .map_err(|_| anyhow!("Failed to install Prometheus recorder: one is already set"))?;

            let server = MetricsServer::new(listener, handle, shutdown_rx);
            task_manager.spawn("MetricsServer", server.run());
            info!(%addr, "Prometheus metrics exposed");
            return Ok(Some(addr));
        }

        if self.config.log_metrics {
            let (recorder, logging_task) = LoggingRecorder::new(
                Duration::from_secs(self.config.log_aggregation_seconds),
                shutdown_rx,
            );
            metrics::set_global_recorder(recorder)
                .map_err(|_| anyhow!("Failed to install logging recorder: one is already set"))?;
            task_manager.spawn("MetricsLogger", logging_task);
            info!(
                "Logging recorder enabled. Metrics will be printed every {} seconds.",
                self.config.log_aggregation_seconds
            );
        }

        Ok(None)
    }
}
