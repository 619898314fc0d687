//! Core domain types and the delivery backend contract.
//!
//! This module defines the notification package that flows through the
//! dispatcher and the `Sender` trait every delivery backend implements.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::dispatch::DispatchError;

/// A single state transition of a monitored metric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EventData {
    /// The metric (target) name.
    pub metric: String,
    /// Unix timestamp of the event, in seconds.
    pub timestamp: i64,
    /// State before the transition (e.g. "OK").
    #[serde(default)]
    pub old_state: String,
    /// State after the transition (e.g. "ERROR").
    pub state: String,
    /// The metric value that caused the transition.
    #[serde(default)]
    pub value: f64,
    /// The trigger that produced this event.
    #[serde(default)]
    pub trigger_id: String,
}

/// Destination of a notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ContactData {
    /// Channel type, e.g. "mail" or "twilio sms".
    #[serde(rename = "type")]
    pub kind: String,
    /// Destination address: an email address, a phone number, ...
    pub value: String,
    #[serde(default)]
    pub id: String,
}

/// Metadata about the alerting rule that produced the events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TriggerData {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub warn_value: f64,
    #[serde(default)]
    pub error_value: f64,
}

/// The unit of work handed to a channel worker.
///
/// A package is never mutated after creation. A failed attempt produces a new
/// package through [`NotificationPackage::into_retry`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NotificationPackage {
    pub events: Vec<EventData>,
    pub contact: ContactData,
    pub trigger: TriggerData,
    /// Whether this delivery is a rate-limited summary.
    #[serde(default)]
    pub throttled: bool,
    /// Number of failed delivery attempts so far. Producers cannot set it.
    #[serde(skip_deserializing)]
    pub fail_count: u32,
}

impl NotificationPackage {
    pub fn new(
        events: Vec<EventData>,
        contact: ContactData,
        trigger: TriggerData,
        throttled: bool,
    ) -> Self {
        Self {
            events,
            contact,
            trigger,
            throttled,
            fail_count: 0,
        }
    }

    /// Consumes the package and returns the next attempt, with one more failure recorded.
    pub fn into_retry(self) -> Self {
        Self {
            fail_count: self.fail_count.saturating_add(1),
            ..self
        }
    }
}

/// Settings for a single delivery backend, as read from configuration.
///
/// Values are kept as strings; numeric and boolean configuration values are
/// stored in their textual form and parsed by the backend that needs them.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct SenderSettings(BTreeMap<String, String>);

impl SenderSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly useful in tests and programmatic setup.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns the value for `key` if it is present and non-empty.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|value| !value.is_empty())
    }

    /// The configured backend type.
    pub fn kind(&self) -> Option<&str> {
        self.get_non_empty("type")
    }

    /// Derives the channel identifier.
    ///
    /// Script backends are identified by their `name` so that several scripts
    /// can be configured side by side; every other backend by its `type`.
    pub fn ident(&self) -> Result<String, DispatchError> {
        let kind = self.kind().ok_or(DispatchError::MissingType)?;
        if kind == "script" {
            return self
                .get_non_empty("name")
                .map(str::to_string)
                .ok_or(DispatchError::MissingName);
        }
        Ok(kind.to_string())
    }
}

impl FromIterator<(String, String)> for SenderSettings {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<SettingValue> for String {
    fn from(value: SettingValue) -> Self {
        match value {
            SettingValue::Bool(b) => b.to_string(),
            SettingValue::Int(i) => i.to_string(),
            SettingValue::Float(f) => f.to_string(),
            SettingValue::Str(s) => s,
        }
    }
}

impl<'de> Deserialize<'de> for SenderSettings {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, SettingValue>::deserialize(deserializer)?;
        Ok(raw.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

/// Errors reported by delivery backends.
#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Can not read [{sender}] {key} param from config")]
    MissingSetting { sender: String, key: &'static str },

    #[error("Invalid [{sender}] {key} param: {reason}")]
    InvalidSetting {
        sender: String,
        key: &'static str,
        reason: String,
    },

    #[error("Failed to render message template: {0}")]
    Template(String),

    #[error("sender is not initialized")]
    NotInitialized,

    #[error("{0}")]
    Delivery(String),
}

// =============================================================================
// Service Traits
// =============================================================================

/// A pluggable delivery backend for one channel type.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Validates and stores backend-specific settings.
    ///
    /// # Arguments
    /// * `settings` - The raw settings block for this backend
    /// * `span` - The channel's tracing span, for backends that log outside the worker
    fn init(&mut self, settings: &SenderSettings, span: &tracing::Span) -> Result<(), SenderError>;

    /// Attempts one delivery.
    ///
    /// Repeated calls are independent attempts; the destination may see
    /// duplicates when a package is retried.
    async fn send_events(
        &self,
        events: &[EventData],
        contact: &ContactData,
        trigger: &TriggerData,
        throttled: bool,
    ) -> Result<(), SenderError>;
}
