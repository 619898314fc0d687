//! HTML mail delivery over SMTP.

use crate::core::{ContactData, EventData, Sender, SenderError, SenderSettings, TriggerData};
use crate::formatting::{mail_subject, MailHtmlFormatter};
use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use tracing::{debug, info};

const SENDER_TYPE: &str = "mail";
const DEFAULT_SMTP_PORT: u16 = 25;
const IMPLICIT_TLS_PORT: u16 = 465;

struct MailConfig {
    from: Mailbox,
    formatter: MailHtmlFormatter,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

/// Sends an HTML table of events to the contact's email address.
#[derive(Default)]
pub struct MailSender {
    config: Option<MailConfig>,
}

fn invalid(key: &'static str, reason: impl ToString) -> SenderError {
    SenderError::InvalidSetting {
        sender: SENDER_TYPE.to_string(),
        key,
        reason: reason.to_string(),
    }
}

fn missing(key: &'static str) -> SenderError {
    SenderError::MissingSetting {
        sender: SENDER_TYPE.to_string(),
        key,
    }
}

fn parse_flag(value: Option<&str>) -> bool {
    matches!(
        value.map(str::to_ascii_lowercase).as_deref(),
        Some("true" | "1" | "yes")
    )
}

impl MailSender {
    /// Builds the message for one delivery.
    pub fn make_message(
        &self,
        events: &[EventData],
        contact: &ContactData,
        trigger: &TriggerData,
        throttled: bool,
    ) -> Result<Message, SenderError> {
        let config = self.config.as_ref().ok_or(SenderError::NotInitialized)?;

        let to: Mailbox = contact.value.parse().map_err(|e| {
            SenderError::Delivery(format!("Invalid email address {}: {}", contact.value, e))
        })?;

        let body = config
            .formatter
            .format_events(events, trigger, throttled)
            .map_err(|e| SenderError::Template(e.to_string()))?;

        Message::builder()
            .from(config.from.clone())
            .to(to)
            .subject(mail_subject(events, trigger))
            .header(ContentType::TEXT_HTML)
            .body(body)
            .map_err(|e| SenderError::Delivery(format!("Failed to build message: {e}")))
    }
}

#[async_trait]
impl Sender for MailSender {
    fn init(&mut self, settings: &SenderSettings, span: &tracing::Span) -> Result<(), SenderError> {
        let from: Mailbox = settings
            .get_non_empty("mail_from")
            .ok_or_else(|| missing("mail_from"))?
            .parse()
            .map_err(|e| invalid("mail_from", e))?;
        let host = settings
            .get_non_empty("mail_smtp_host")
            .ok_or_else(|| missing("mail_smtp_host"))?
            .to_string();
        let port = match settings.get_non_empty("mail_smtp_port") {
            Some(port) => port.parse::<u16>().map_err(|e| invalid("mail_smtp_port", e))?,
            None => DEFAULT_SMTP_PORT,
        };
        let insecure_tls = parse_flag(settings.get("mail_insecure_tls"));
        let front_uri = settings.get("front_uri").unwrap_or_default();
        let formatter = MailHtmlFormatter::new(front_uri)
            .map_err(|e| SenderError::Template(e.to_string()))?;

        let tls_parameters = TlsParameters::builder(host.clone())
            .dangerous_accept_invalid_certs(insecure_tls)
            .build()
            .map_err(|e| invalid("mail_smtp_host", e))?;
        let tls = if port == IMPLICIT_TLS_PORT {
            Tls::Wrapper(tls_parameters)
        } else {
            Tls::Opportunistic(tls_parameters)
        };
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&host)
            .port(port)
            .tls(tls)
            .timeout(Some(Duration::from_secs(30)))
            .build();

        span.in_scope(|| info!(smtp_host = %host, smtp_port = port, insecure_tls, "Mail sender configured"));
        self.config = Some(MailConfig {
            from,
            formatter,
            transport,
        });
        Ok(())
    }

    async fn send_events(
        &self,
        events: &[EventData],
        contact: &ContactData,
        trigger: &TriggerData,
        throttled: bool,
    ) -> Result<(), SenderError> {
        let message = self.make_message(events, contact, trigger, throttled)?;
        let config = self.config.as_ref().ok_or(SenderError::NotInitialized)?;

        let response = config
            .transport
            .send(message)
            .await
            .map_err(|e| SenderError::Delivery(e.to_string()))?;
        debug!(contact = %contact.value, code = %response.code(), "Mail accepted by SMTP server");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SenderSettings {
        SenderSettings::new()
            .with("type", "mail")
            .with("mail_from", "moira@example.com")
            .with("mail_smtp_host", "127.0.0.1")
            .with("mail_smtp_port", "1")
            .with("front_uri", "https://moira.example.com")
    }

    fn initialized() -> MailSender {
        let mut sender = MailSender::default();
        sender.init(&settings(), &tracing::Span::none()).unwrap();
        sender
    }

    fn contact() -> ContactData {
        ContactData {
            kind: "mail".to_string(),
            value: "a@b.com".to_string(),
            id: String::new(),
        }
    }

    fn trigger() -> TriggerData {
        TriggerData {
            id: "t1".to_string(),
            name: "T".to_string(),
            tags: vec!["x".to_string()],
            ..Default::default()
        }
    }

    fn events(n: usize) -> Vec<EventData> {
        (0..n)
            .map(|i| EventData {
                metric: format!("metric{i}"),
                state: "OK".to_string(),
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn init_requires_smtp_host() {
        let settings = SenderSettings::new()
            .with("type", "mail")
            .with("mail_from", "moira@example.com");
        let err = MailSender::default()
            .init(&settings, &tracing::Span::none())
            .unwrap_err();
        assert_eq!(err.to_string(), "Can not read [mail] mail_smtp_host param from config");
    }

    #[test]
    fn init_rejects_bad_port() {
        let settings = settings().with("mail_smtp_port", "smtp");
        let err = MailSender::default()
            .init(&settings, &tracing::Span::none())
            .unwrap_err();
        assert!(matches!(err, SenderError::InvalidSetting { key: "mail_smtp_port", .. }));
    }

    #[test]
    fn message_has_subject_and_recipient() {
        let message = initialized()
            .make_message(&events(3), &contact(), &trigger(), false)
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("Subject: [x] OK T"), "{raw}");
        assert!(raw.contains("a@b.com"));
    }

    #[test]
    fn invalid_recipient_is_a_delivery_error() {
        let contact = ContactData {
            value: "not an address".to_string(),
            ..contact()
        };
        let err = initialized()
            .make_message(&events(1), &contact, &trigger(), false)
            .unwrap_err();
        assert!(matches!(err, SenderError::Delivery(_)));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_delivery_error() {
        let result = initialized()
            .send_events(&events(1), &contact(), &trigger(), false)
            .await;
        assert!(matches!(result, Err(SenderError::Delivery(_))));
    }
}
