//! Delivery by running an operator-supplied command.

use crate::core::{ContactData, EventData, Sender, SenderError, SenderSettings, TriggerData};
use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

const SENDER_TYPE: &str = "script";

/// The document written to the command's stdin.
#[derive(Serialize)]
struct ScriptMessage<'a> {
    events: &'a [EventData],
    contact: &'a ContactData,
    trigger: &'a TriggerData,
    throttled: bool,
}

/// Runs `exec` once per delivery with the package as JSON on stdin.
///
/// Arguments may reference `${trigger_name}`, `${trigger_id}`,
/// `${contact_type}` and `${contact_value}`.
#[derive(Default)]
pub struct ScriptSender {
    name: String,
    exec: Vec<String>,
}

/// Replaces the supported placeholders in one argument.
pub fn substitute(arg: &str, contact: &ContactData, trigger: &TriggerData) -> String {
    arg.replace("${trigger_name}", &trigger.name)
        .replace("${trigger_id}", &trigger.id)
        .replace("${contact_type}", &contact.kind)
        .replace("${contact_value}", &contact.value)
}

#[async_trait]
impl Sender for ScriptSender {
    fn init(&mut self, settings: &SenderSettings, span: &tracing::Span) -> Result<(), SenderError> {
        let name = settings
            .get_non_empty("name")
            .ok_or_else(|| SenderError::MissingSetting {
                sender: SENDER_TYPE.to_string(),
                key: "name",
            })?;
        let exec: Vec<String> = settings
            .get("exec")
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if exec.is_empty() {
            return Err(SenderError::MissingSetting {
                sender: name.to_string(),
                key: "exec",
            });
        }

        span.in_scope(|| info!(command = %exec[0], "Script sender configured"));
        self.name = name.to_string();
        self.exec = exec;
        Ok(())
    }

    async fn send_events(
        &self,
        events: &[EventData],
        contact: &ContactData,
        trigger: &TriggerData,
        throttled: bool,
    ) -> Result<(), SenderError> {
        let (program, args) = self.exec.split_first().ok_or(SenderError::NotInitialized)?;
        let args: Vec<String> = args
            .iter()
            .map(|arg| substitute(arg, contact, trigger))
            .collect();

        let payload = serde_json::to_vec(&ScriptMessage {
            events,
            contact,
            trigger,
            throttled,
        })
        .map_err(|e| SenderError::Delivery(format!("Failed to encode script input: {e}")))?;

        let mut child = Command::new(program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SenderError::Delivery(format!("Failed to run {program}: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A script that ignores its input may exit before reading it.
            if let Err(e) = stdin.write_all(&payload).await {
                debug!(error = %e, "Script did not consume its input");
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SenderError::Delivery(format!("Failed to wait for {program}: {e}")))?;

        if !output.status.success() {
            return Err(SenderError::Delivery(format!(
                "Script {} exited with {}: {}",
                self.name,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        debug!(script = %self.name, "Script finished");
        Ok(())
    }
}
