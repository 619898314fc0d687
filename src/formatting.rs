// src/formatting.rs

use crate::core::{EventData, TriggerData};
use chrono::DateTime;
use handlebars::{Handlebars, RenderError, TemplateError};
use serde::Serialize;

const THROTTLED_NOTICE: &str =
    "Please, fix your system or tune this trigger to generate less events.";

/// Maximum number of events listed line by line in a text message.
pub const MAX_LISTED_EVENTS: usize = 5;

const STATE_ORDER: [&str; 5] = ["OK", "WARN", "ERROR", "NODATA", "TEST"];

/// A trait for rendering a set of events into a message body.
pub trait TextFormatter: Send + Sync {
    fn format_events(&self, events: &[EventData], trigger: &TriggerData, throttled: bool) -> String;
}

/// Plain text for SMS: a summary line followed by one line per event.
pub struct SmsTextFormatter;

impl TextFormatter for SmsTextFormatter {
    fn format_events(&self, events: &[EventData], trigger: &TriggerData, throttled: bool) -> String {
        let mut message = format!(
            "{} {} {} ({})\n\n",
            subject_state(events),
            trigger.name,
            format_tags(&trigger.tags),
            events.len()
        );

        for event in events.iter().take(MAX_LISTED_EVENTS) {
            message.push_str(&format!(
                "{}: {} = {} ({} to {})\n",
                format_timestamp(event.timestamp, "%H:%M"),
                event.metric,
                event.value,
                event.old_state,
                event.state
            ));
        }

        if events.len() > MAX_LISTED_EVENTS {
            message.push_str(&format!(
                "\n...and {} more events.",
                events.len() - MAX_LISTED_EVENTS
            ));
        }

        if throttled {
            message.push('\n');
            message.push_str(THROTTLED_NOTICE);
        }
        message
    }
}

const MAIL_TEMPLATE_NAME: &str = "mail";

const MAIL_TEMPLATE: &str = r#"<html>
<head>
<style type="text/css">
table { border-collapse: collapse; }
table th, table td { padding: 0.5em; border: 1px solid black; }
tr.OK { background-color: #33cc99; color: white; }
tr.WARN { background-color: #cccc32; color: white; }
tr.ERROR { background-color: #cc0032; color: white; }
tr.NODATA { background-color: #d3d3d3; color: black; }
tr.EXCEPTION { background-color: #e14f4f; color: white; }
</style>
</head>
<body>
<table>
<thead><tr><th>Timestamp</th><th>Target</th><th>Value</th><th>Warn</th><th>Error</th><th>From</th><th>To</th></tr></thead>
<tbody>
{{#each rows}}<tr class="{{state}}"><td>{{time}}</td><td>{{metric}}</td><td>{{value}}</td><td>{{warn}}</td><td>{{error}}</td><td>{{old_state}}</td><td>{{state}}</td></tr>
{{/each}}</tbody>
</table>
<p><a href="{{link}}">{{link}}</a></p>
{{#if throttled}}<p>{{notice}}</p>
{{/if}}</body>
</html>
"#;

#[derive(Serialize)]
struct MailRow<'a> {
    state: &'a str,
    time: String,
    metric: &'a str,
    value: f64,
    warn: f64,
    error: f64,
    old_state: &'a str,
}

#[derive(Serialize)]
struct MailContext<'a> {
    rows: Vec<MailRow<'a>>,
    link: String,
    throttled: bool,
    notice: &'static str,
}

/// An HTML table of events with a link back to the trigger page.
///
/// Rendered with handlebars, which escapes every interpolated value.
pub struct MailHtmlFormatter {
    front_uri: String,
    registry: Handlebars<'static>,
}

impl MailHtmlFormatter {
    pub fn new(front_uri: impl Into<String>) -> Result<Self, TemplateError> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(false);
        registry.register_template_string(MAIL_TEMPLATE_NAME, MAIL_TEMPLATE)?;
        Ok(Self {
            front_uri: front_uri.into(),
            registry,
        })
    }

    pub fn format_events(
        &self,
        events: &[EventData],
        trigger: &TriggerData,
        throttled: bool,
    ) -> Result<String, RenderError> {
        let context = MailContext {
            rows: events
                .iter()
                .map(|event| MailRow {
                    state: &event.state,
                    time: format_timestamp(event.timestamp, "%H:%M %d.%m.%Y"),
                    metric: &event.metric,
                    value: event.value,
                    warn: trigger.warn_value,
                    error: trigger.error_value,
                    old_state: &event.old_state,
                })
                .collect(),
            link: format!("{}/#/events/{}", self.front_uri, trigger.id),
            throttled,
            notice: THROTTLED_NOTICE,
        };
        self.registry.render(MAIL_TEMPLATE_NAME, &context)
    }
}

/// The state(s) summarizing a set of events.
///
/// A single event yields its own state; several events yield every distinct
/// known state they contain, in a fixed order.
pub fn subject_state(events: &[EventData]) -> String {
    if let [event] = events {
        return event.state.clone();
    }
    STATE_ORDER
        .iter()
        .filter(|state| events.iter().any(|event| event.state == **state))
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Renders tags as `[tag1][tag2]`.
pub fn format_tags(tags: &[String]) -> String {
    tags.iter().map(|tag| format!("[{tag}]")).collect()
}

/// Mail subject: `[tag1][tag2] STATES trigger name`.
pub fn mail_subject(events: &[EventData], trigger: &TriggerData) -> String {
    let subject = format!(
        "{} {} {}",
        format_tags(&trigger.tags),
        subject_state(events),
        trigger.name
    );
    subject.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn format_timestamp(timestamp: i64, format: &str) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|time| time.format(format).to_string())
        .unwrap_or_else(|| timestamp.to_string())
}
