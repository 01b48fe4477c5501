//! Outbound mail.

pub mod smtp;
pub mod template;

pub use smtp::{SmtpConfig, SmtpMailer};

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::MailError;

/// One message to send. `body` may be plain text or HTML; the transport
/// derives both alternatives from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: Option<PathBuf>,
}

#[async_trait]
pub trait MailService: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}
