//! Notifier - routes alert notifications to their delivery backends.
//!
//! Reads newline-delimited JSON notification packages from stdin and hands
//! each one to the sender registered for its contact type.

use anyhow::Result;
use clap::Parser;
use notifier::{
    app::App, cli::Cli, config::Config, internal_metrics::MetricsBuilder,
    task_manager::TaskManager,
};
use tokio::io::BufReader;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = Config::load(&cli).unwrap_or_else(|err| {
        eprintln!("Failed to load configuration: {err:#}");
        std::process::exit(1);
    });

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Notifier starting up...");
    info!("-------------------- Configuration --------------------");
    info!("Log Level: {}", config.log_level);
    info!("Queue Capacity: {}", config.dispatch.queue_capacity);
    info!("Max Retries: {}", config.dispatch.retry.max_retries);
    info!(
        "Retry Backoff: {}ms (x{}, max {}ms)",
        config.dispatch.retry.initial_backoff_ms,
        config.dispatch.retry.backoff_factor,
        config.dispatch.retry.max_backoff_ms
    );
    info!("Prometheus Metrics: {}", config.metrics.enabled);
    info!("Log Metrics: {}", config.metrics.log_metrics);
    for settings in &config.senders {
        info!("Sender: {}", settings.kind().unwrap_or("<missing type>"));
    }
    info!("-------------------------------------------------------");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task_manager = TaskManager::new();

    MetricsBuilder::new(config.metrics.clone())
        .build(&task_manager, shutdown_rx.clone())
        .await?;

    let app = match App::builder(config).build() {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to start: {e:#}");
            shutdown_tx.send_replace(true);
            task_manager.shutdown().await;
            std::process::exit(1);
        }
    };

    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received. Shutting down gracefully...");
                shutdown_tx.send_replace(true);
            }
        });
    }

    info!("Notifier initialized. Reading notifications from stdin...");
    let result = app
        .run(BufReader::new(tokio::io::stdin()), shutdown_rx)
        .await;

    shutdown_tx.send_replace(true);
    let panicked = task_manager.shutdown().await;
    if panicked > 0 {
        error!("{} background tasks panicked", panicked);
    }

    info!("All tasks shut down. Exiting.");
    result.map(|_| ())
}
