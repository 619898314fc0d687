//! The long-lived consumer bound to one channel.

use crate::core::{NotificationPackage, Sender};
use crate::dispatch::resend::Resender;
use crate::internal_metrics::ChannelMetrics;
use async_channel::Receiver;
use std::sync::Arc;
use tracing::{debug, info};

/// Pulls packages off one channel's queue and hands them to its backend.
///
/// The worker keeps running until its queue is closed and empty. Closing the
/// queue does not discard anything already enqueued: every remaining package
/// is attempted before the worker exits.
pub(crate) struct ChannelWorker {
    ident: Arc<str>,
    sender: Box<dyn Sender>,
    queue: Receiver<NotificationPackage>,
    metrics: ChannelMetrics,
    resender: Resender,
}

impl ChannelWorker {
    pub(crate) fn new(
        ident: Arc<str>,
        sender: Box<dyn Sender>,
        queue: Receiver<NotificationPackage>,
        metrics: ChannelMetrics,
        resender: Resender,
    ) -> Self {
        Self {
            ident,
            sender,
            queue,
            metrics,
            resender,
        }
    }

    pub(crate) async fn run(self) {
        debug!("Sender worker for {} started", self.ident);
        let mut draining = false;

        while let Ok(pkg) = self.queue.recv().await {
            if !draining && self.queue.is_closed() {
                draining = true;
                debug!(
                    remaining = self.queue.len() + 1,
                    "Queue closed, draining remaining packages"
                );
            }
            self.deliver(pkg).await;
        }

        info!("Sender worker for {} finished", self.ident);
    }

    async fn deliver(&self, pkg: NotificationPackage) {
        let result = self
            .sender
            .send_events(&pkg.events, &pkg.contact, &pkg.trigger, pkg.throttled)
            .await;

        match result {
            Ok(()) => {
                self.metrics.sends_ok.increment(1);
                debug!(
                    contact = %pkg.contact.value,
                    trigger = %pkg.trigger.name,
                    events = pkg.events.len(),
                    "Notification sent"
                );
            }
            Err(e) => self.resender.resend(pkg, &e.to_string()),
        }
    }
}
