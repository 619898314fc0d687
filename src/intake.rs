//! Reads notification packages from a line-oriented JSON stream.

use crate::core::NotificationPackage;
use crate::dispatch::{DispatchError, Dispatcher};
use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error, warn};

/// Outcome counts of one intake run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IntakeStats {
    /// Packages handed to a channel queue.
    pub accepted: u64,
    /// Lines that were not a valid package.
    pub malformed: u64,
    /// Packages whose channel is unknown or closed.
    pub rejected: u64,
}

/// Dispatches every package read from `reader` until end of input.
///
/// Each non-empty line must hold one JSON-encoded package. Bad lines and
/// undeliverable packages are logged and counted; they do not stop intake.
/// Only read errors on the underlying stream are returned.
pub async fn run<R>(reader: R, dispatcher: &Dispatcher) -> Result<IntakeStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = IntakeStats::default();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let pkg: NotificationPackage = match serde_json::from_str(line) {
            Ok(pkg) => pkg,
            Err(e) => {
                warn!(error = %e, "Skipping malformed notification");
                stats.malformed += 1;
                continue;
            }
        };

        let channel = pkg.contact.kind.clone();
        match dispatcher.dispatch_package(pkg).await {
            Ok(()) => {
                debug!(channel = %channel, "Notification queued");
                stats.accepted += 1;
            }
            Err(e @ DispatchError::UnknownChannel(_)) => {
                error!(error = %e, "Unknown contact type");
                stats.rejected += 1;
            }
            Err(e) => {
                error!(channel = %channel, error = %e, "Failed to queue notification");
                stats.rejected += 1;
            }
        }
    }

    Ok(stats)
}
