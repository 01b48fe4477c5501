//! SMTP transport via lettre (STARTTLS relay, app-password auth).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use super::template::compose_body;
use super::{MailService, OutgoingEmail};
use crate::error::MailError;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// Defaults to `username` when built from the environment.
    pub from_address: String,
}

pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    pub fn from_address(&self) -> &str {
        &self.config.from_address
    }
}

#[async_trait]
impl MailService for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let message = build_message(&self.config.from_address, email)?;
        let config = self.config.clone();
        let to = email.to.clone();

        // lettre's sync transport blocks; keep it off the runtime threads.
        tokio::task::spawn_blocking(move || deliver(&config, &message))
            .await
            .map_err(|e| MailError::Transport(format!("send task failed: {e}")))??;

        info!(to = %to, subject = %email.subject, "Email sent");
        Ok(())
    }
}

fn deliver(config: &SmtpConfig, message: &Message) -> Result<(), MailError> {
    let creds = Credentials::new(
        config.username.clone(),
        config.password.expose_secret().to_string(),
    );

    let transport = SmtpTransport::starttls_relay(&config.host)
        .map_err(|e| MailError::Transport(format!("SMTP relay error: {e}")))?
        .port(config.port)
        .credentials(creds)
        .timeout(Some(SMTP_TIMEOUT))
        .build();

    transport
        .send(message)
        .map_err(|e| MailError::Transport(e.to_string()))?;
    Ok(())
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    address
        .trim()
        .parse()
        .map_err(|e: lettre::address::AddressError| MailError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

/// Build the MIME message: an alternative (plain + HTML) part, plus the
/// attachment under a mixed part when one is configured.
pub fn build_message(from: &str, email: &OutgoingEmail) -> Result<Message, MailError> {
    let composed = compose_body(&email.body);
    let alternative = MultiPart::alternative_plain_html(composed.plain, composed.html);

    let body = match &email.attachment {
        Some(path) => {
            let bytes = std::fs::read(path).map_err(|source| MailError::Attachment {
                path: path.clone(),
                source,
            })?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "attachment".to_string());
            let content_type = ContentType::parse(attachment_mime(path))
                .map_err(|e| MailError::Build(format!("content type: {e}")))?;
            MultiPart::mixed()
                .multipart(alternative)
                .singlepart(Attachment::new(filename).body(bytes, content_type))
        }
        None => alternative,
    };

    Message::builder()
        .from(parse_mailbox(from)?)
        .to(parse_mailbox(&email.to)?)
        .subject(email.subject.clone())
        .multipart(body)
        .map_err(|e| MailError::Build(e.to_string()))
}

fn attachment_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}
