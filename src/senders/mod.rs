//! Concrete delivery backends.
//!
//! Each backend implements [`Sender`](crate::core::Sender) and is selected by
//! the `type` key of its settings block.

pub mod mail;
pub mod script;
pub mod twilio;

use crate::core::{Sender, SenderSettings};
use crate::dispatch::DispatchError;

pub use mail::MailSender;
pub use script::ScriptSender;
pub use twilio::TwilioSender;

/// Creates an uninitialized backend for the `type` named in `settings`.
pub fn from_settings(settings: &SenderSettings) -> Result<Box<dyn Sender>, DispatchError> {
    let kind = settings.kind().ok_or(DispatchError::MissingType)?;
    let sender: Box<dyn Sender> = match kind {
        "mail" => Box::new(MailSender::default()),
        "twilio sms" | "twilio voice" => Box::new(TwilioSender::default()),
        "script" => Box::new(ScriptSender::default()),
        other => return Err(DispatchError::UnknownSenderType(other.to_string())),
    };
    Ok(sender)
}
