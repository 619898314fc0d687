//! Notifier - the dispatch core of an alerting notifier.
//!
//! Delivery backends register under a channel identifier; every channel gets
//! a bounded queue and a dedicated worker that delivers packages, retries
//! failures and records per-channel counters.

pub mod app;
pub mod cli;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod formatting;
pub mod intake;
pub mod internal_metrics;
pub mod senders;
pub mod task_manager;

// Re-export core types for convenience
pub use crate::core::*;
pub use crate::dispatch::{DispatchError, Dispatcher, RetryPolicy};
