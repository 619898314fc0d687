//! Retry scheduling for failed deliveries.
//!
//! A failed package is not retried inline by its worker. Instead a retry task
//! waits out the backoff delay and puts the package back on the same
//! channel's queue, so the worker keeps serving new packages in the meantime.

use crate::core::NotificationPackage;
use crate::internal_metrics::ChannelMetrics;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, warn};

/// How many times a failed package is retried and how long to wait in between.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt. A package is attempted at most
    /// `max_retries + 1` times.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Multiplier applied to the delay for every further retry.
    pub backoff_factor: f64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_backoff_ms: u64,
    /// Random spread applied to each delay, as a fraction of it (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 60_000,
            backoff_factor: 2.0,
            max_backoff_ms: 900_000,
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Returns true once a package that failed `fail_count` times must be dropped.
    pub fn is_exhausted(&self, fail_count: u32) -> bool {
        fail_count > self.max_retries
    }

    /// Delay before retrying a package that has failed `fail_count` times.
    pub fn delay_for(&self, fail_count: u32) -> Duration {
        let exponent = i32::try_from(fail_count.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.initial_backoff_ms as f64 * self.backoff_factor.powi(exponent);
        let capped = base.min(self.max_backoff_ms as f64);

        let delay = if self.jitter > 0.0 {
            let spread = capped * self.jitter;
            capped + rand::rng().random_range(-spread..=spread)
        } else {
            capped
        };
        Duration::from_millis(delay.max(0.0) as u64)
    }
}

/// Owns the retry tasks of every channel so shutdown can wait for them.
#[derive(Clone, Default)]
pub(crate) struct RetryTracker {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl RetryTracker {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.lock();
        // Reap finished retries so the set does not grow for the process lifetime.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(future);
    }

    /// Waits for every outstanding retry task.
    pub(crate) async fn join_all(&self) {
        let mut tasks = std::mem::take(&mut *self.lock());
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Retry task panicked");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The resend path of one channel.
#[derive(Clone)]
pub(crate) struct Resender {
    ident: Arc<str>,
    queue: async_channel::Sender<NotificationPackage>,
    policy: RetryPolicy,
    metrics: ChannelMetrics,
    pending: RetryTracker,
    shutdown_rx: watch::Receiver<bool>,
}

impl Resender {
    pub(crate) fn new(
        ident: Arc<str>,
        queue: async_channel::Sender<NotificationPackage>,
        policy: RetryPolicy,
        metrics: ChannelMetrics,
        pending: RetryTracker,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            ident,
            queue,
            policy,
            metrics,
            pending,
            shutdown_rx,
        }
    }

    /// Records a failed attempt and either schedules the next one or gives up.
    pub(crate) fn resend(&self, pkg: NotificationPackage, reason: &str) {
        let pkg = pkg.into_retry();

        if self.policy.is_exhausted(pkg.fail_count) {
            self.give_up(&pkg, reason, "retry budget exhausted");
            return;
        }
        if *self.shutdown_rx.borrow() {
            self.give_up(&pkg, reason, "dispatcher is shutting down");
            return;
        }

        let delay = self.policy.delay_for(pkg.fail_count);
        warn!(
            channel = %self.ident,
            fail_count = pkg.fail_count,
            error = reason,
            "Can't send message after {} try. Retry again after {:?}",
            pkg.fail_count,
            delay
        );

        let this = self.clone();
        let reason = reason.to_string();
        self.pending
            .spawn(async move { this.requeue_after(pkg, delay, reason).await });
    }

    async fn requeue_after(self, pkg: NotificationPackage, delay: Duration, reason: String) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let shutting_down = tokio::select! {
            biased;
            _ = shutdown_rx.wait_for(|stop| *stop) => true,
            _ = tokio::time::sleep(delay) => false,
        };
        if shutting_down {
            self.give_up(&pkg, &reason, "dispatcher shut down before the retry was due");
            return;
        }

        if let Err(async_channel::SendError(pkg)) = self.queue.send(pkg).await {
            self.give_up(&pkg, &reason, "channel queue is closed");
        }
    }

    fn give_up(&self, pkg: &NotificationPackage, reason: &str, why: &str) {
        self.metrics.sends_failed.increment(1);
        error!(
            channel = %self.ident,
            contact = %pkg.contact.value,
            trigger = %pkg.trigger.name,
            fail_count = pkg.fail_count,
            error = reason,
            "Stop resending: {}",
            why
        );
    }
}
