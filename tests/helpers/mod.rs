#![allow(dead_code)]
pub mod mock_sender;
pub mod test_metrics;

use notifier::core::{ContactData, EventData, NotificationPackage, TriggerData};

/// A package for `channel` with `events` generated events.
pub fn package(channel: &str, contact: &str, events: usize) -> NotificationPackage {
    NotificationPackage::new(
        (0..events)
            .map(|i| EventData {
                metric: format!("metric{i}"),
                timestamp: 1_700_000_000 + i as i64,
                old_state: "OK".to_string(),
                state: "ERROR".to_string(),
                value: i as f64,
                trigger_id: "trigger-1".to_string(),
            })
            .collect(),
        ContactData {
            kind: channel.to_string(),
            value: contact.to_string(),
            id: String::new(),
        },
        TriggerData {
            id: "trigger-1".to_string(),
            name: "T".to_string(),
            tags: vec!["x".to_string()],
            ..Default::default()
        },
        false,
    )
}
