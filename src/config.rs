//! Configuration management for the notifier.
//!
//! Settings are layered with `figment`: built-in defaults, then the TOML file
//! given on the command line, then `NOTIFIER_`-prefixed environment variables
//! (`__` separates nested keys), then explicit command-line flags.

use anyhow::{bail, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::cli::Cli;
use crate::core::SenderSettings;
use crate::dispatch::RetryPolicy;

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// The logging level used when `RUST_LOG` is not set.
    pub log_level: String,
    /// Queueing and retry settings.
    pub dispatch: DispatchConfig,
    /// Metrics exporter settings.
    pub metrics: MetricsConfig,
    /// One settings block per delivery backend.
    #[serde(default)]
    pub senders: Vec<SenderSettings>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Capacity of each channel queue. 1 is the closest to a direct handoff.
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Expose a Prometheus `/metrics` endpoint.
    pub enabled: bool,
    /// Address of the Prometheus endpoint.
    pub listen_address: SocketAddr,
    /// Log every counter periodically (used when Prometheus is disabled).
    pub log_metrics: bool,
    pub log_aggregation_seconds: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: SocketAddr::from(([127, 0, 0, 1], 9090)),
            log_metrics: false,
            log_aggregation_seconds: 60,
        }
    }
}

impl Config {
    /// Loads the configuration from defaults, the file named by `cli`, the
    /// environment and the command-line flags, in increasing precedence.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if let Some(path) = &cli.config {
            figment = figment.merge(Toml::file(path));
        }
        let config: Config = figment
            .merge(Env::prefixed("NOTIFIER_").split("__"))
            .merge(cli.clone())
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration from a TOML string on top of the defaults.
    pub fn from_toml(toml: &str) -> Result<Self> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(toml))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dispatch.queue_capacity == 0 {
            bail!("dispatch.queue_capacity must be at least 1");
        }
        let retry = &self.dispatch.retry;
        if retry.backoff_factor < 1.0 {
            bail!(
                "dispatch.retry.backoff_factor must be at least 1.0, got {}",
                retry.backoff_factor
            );
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            bail!(
                "dispatch.retry.jitter must be between 0.0 and 1.0, got {}",
                retry.jitter
            );
        }
        if self.metrics.log_metrics && self.metrics.log_aggregation_seconds == 0 {
            bail!("metrics.log_aggregation_seconds must be at least 1");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            dispatch: DispatchConfig::default(),
            metrics: MetricsConfig::default(),
            senders: Vec::new(),
        }
    }
}
