//! SMS and voice delivery through the Twilio REST API.

use crate::core::{ContactData, EventData, Sender, SenderError, SenderSettings, TriggerData};
use crate::formatting::{SmsTextFormatter, TextFormatter};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, instrument};

const DEFAULT_API_URL: &str = "https://api.twilio.com";

#[derive(Debug, Clone, PartialEq)]
enum Mode {
    Sms,
    Voice { voice_url: String },
}

#[derive(Debug, Clone)]
struct TwilioConfig {
    api_url: String,
    account_sid: String,
    auth_token: String,
    from_phone: String,
    mode: Mode,
}

/// Response fields we care about for both messages and calls.
#[derive(Debug, Deserialize)]
struct TwilioResource {
    #[serde(default)]
    status: String,
}

/// Sends SMS (`type = "twilio sms"`) or places voice calls (`type = "twilio voice"`).
pub struct TwilioSender {
    config: Option<TwilioConfig>,
    client: reqwest::Client,
    timeout: Duration,
}

impl Default for TwilioSender {
    fn default() -> Self {
        Self {
            config: None,
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

fn required(settings: &SenderSettings, kind: &str, key: &'static str) -> Result<String, SenderError> {
    settings
        .get_non_empty(key)
        .map(str::to_string)
        .ok_or_else(|| SenderError::MissingSetting {
            sender: kind.to_string(),
            key,
        })
}

impl TwilioSender {
    async fn post(
        &self,
        config: &TwilioConfig,
        resource: &str,
        form: &[(&str, &str)],
    ) -> Result<TwilioResource, String> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/{}.json",
            config.api_url.trim_end_matches('/'),
            config.account_sid,
            resource
        );
        let response = self
            .client
            .post(&url)
            .basic_auth(&config.account_sid, Some(&config.auth_token))
            .timeout(self.timeout)
            .form(form)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Twilio API rejected the request");
            return Err(format!("status {status}, body: {body}"));
        }
        response
            .json::<TwilioResource>()
            .await
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl Sender for TwilioSender {
    fn init(&mut self, settings: &SenderSettings, span: &tracing::Span) -> Result<(), SenderError> {
        let kind = settings.kind().unwrap_or_default().to_string();

        let account_sid = required(settings, &kind, "api_asid")?;
        let auth_token = required(settings, &kind, "api_authtoken")?;
        let from_phone = required(settings, &kind, "api_fromphone")?;

        let mode = match kind.as_str() {
            "twilio sms" => Mode::Sms,
            "twilio voice" => Mode::Voice {
                voice_url: required(settings, &kind, "voiceurl")?,
            },
            other => {
                return Err(SenderError::InvalidSetting {
                    sender: other.to_string(),
                    key: "type",
                    reason: format!("Wrong twilio type: {other}"),
                })
            }
        };

        let api_url = settings
            .get_non_empty("api_url")
            .unwrap_or(DEFAULT_API_URL)
            .to_string();

        span.in_scope(|| debug!(api_url = %api_url, mode = ?mode, "Twilio sender configured"));
        self.config = Some(TwilioConfig {
            api_url,
            account_sid,
            auth_token,
            from_phone,
            mode,
        });
        Ok(())
    }

    #[instrument(skip_all, fields(contact = %contact.value))]
    async fn send_events(
        &self,
        events: &[EventData],
        contact: &ContactData,
        trigger: &TriggerData,
        throttled: bool,
    ) -> Result<(), SenderError> {
        let config = self.config.as_ref().ok_or(SenderError::NotInitialized)?;

        match &config.mode {
            Mode::Sms => {
                let body = SmsTextFormatter.format_events(events, trigger, throttled);
                debug!(body = %body, "Calling twilio sms api");
                let message = self
                    .post(
                        config,
                        "Messages",
                        &[
                            ("From", config.from_phone.as_str()),
                            ("To", contact.value.as_str()),
                            ("Body", body.as_str()),
                        ],
                    )
                    .await
                    .map_err(|e| {
                        SenderError::Delivery(format!(
                            "Failed to send message to contact {}: {}",
                            contact.value, e
                        ))
                    })?;
                debug!("message send to twilio with status: {}", message.status);
            }
            Mode::Voice { voice_url } => {
                let call = self
                    .post(
                        config,
                        "Calls",
                        &[
                            ("From", config.from_phone.as_str()),
                            ("To", contact.value.as_str()),
                            ("Url", voice_url.as_str()),
                        ],
                    )
                    .await
                    .map_err(|e| {
                        SenderError::Delivery(format!(
                            "Failed to make call to contact {}: {}",
                            contact.value, e
                        ))
                    })?;
                debug!("call queued to twilio with status: {}", call.status);
            }
        }
        Ok(())
    }
}
