//! Mail provider abstraction and implementations.

use std::path::PathBuf;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::debug;
use uuid::Uuid;

use crate::config::SmtpConfig;
use crate::error::DispatchError;

/// One outbound email, ready for a provider.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<PathBuf>,
}

/// A mail delivery provider. Returns an opaque provider message id.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Provider name, recorded in the dispatch ledger.
    fn name(&self) -> &str;

    /// True for providers that must not be contacted at all — the
    /// dispatcher records a SKIPPED dispatch instead of calling `send`.
    fn is_noop(&self) -> bool {
        false
    }

    /// Deliver the email, returning the provider's message id.
    async fn send(&self, email: &OutboundEmail) -> Result<String, DispatchError>;
}

/// The safe default: records dispatches without contacting anything.
pub struct ManualProvider;

#[async_trait]
impl MailProvider for ManualProvider {
    fn name(&self) -> &str {
        "manual"
    }

    fn is_noop(&self) -> bool {
        true
    }

    async fn send(&self, _email: &OutboundEmail) -> Result<String, DispatchError> {
        // Unreachable in practice: the dispatcher short-circuits no-op
        // providers. Kept safe anyway.
        Ok(String::new())
    }
}

/// SMTP delivery via lettre with rustls TLS.
pub struct SmtpProvider {
    config: SmtpConfig,
}

impl SmtpProvider {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MailProvider for SmtpProvider {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, email: &OutboundEmail) -> Result<String, DispatchError> {
        let message_id = format!("<{}@warranty-desk>", Uuid::new_v4());

        let builder = Message::builder()
            .from(email.sender.parse().map_err(|e| DispatchError::Provider {
                provider: "smtp".to_string(),
                reason: format!("Invalid sender address: {e}"),
            })?)
            .to(email
                .recipient
                .parse()
                .map_err(|e| DispatchError::Provider {
                    provider: "smtp".to_string(),
                    reason: format!("Invalid recipient address: {e}"),
                })?)
            .subject(&email.subject)
            .message_id(Some(message_id.clone()));

        let message = if email.attachments.is_empty() {
            builder
                .body(email.body.clone())
                .map_err(|e| DispatchError::Provider {
                    provider: "smtp".to_string(),
                    reason: format!("Failed to build message: {e}"),
                })?
        } else {
            let mut multipart = MultiPart::mixed().singlepart(SinglePart::plain(email.body.clone()));
            for path in &email.attachments {
                let bytes = std::fs::read(path).map_err(|e| DispatchError::Provider {
                    provider: "smtp".to_string(),
                    reason: format!("Failed to read attachment {}: {e}", path.display()),
                })?;
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "attachment".to_string());
                multipart = multipart.singlepart(
                    Attachment::new(file_name).body(bytes, ContentType::TEXT_PLAIN),
                );
            }
            builder
                .multipart(multipart)
                .map_err(|e| DispatchError::Provider {
                    provider: "smtp".to_string(),
                    reason: format!("Failed to build message: {e}"),
                })?
        };

        let mut transport_builder = SmtpTransport::relay(&self.config.host)
            .map_err(|e| DispatchError::Provider {
                provider: "smtp".to_string(),
                reason: format!("SMTP relay setup failed: {e}"),
            })?
            .port(self.config.port);

        if !self.config.username.is_empty() {
            transport_builder = transport_builder.credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.expose_secret().to_string(),
            ));
        }
        let transport = transport_builder.build();

        transport
            .send(&message)
            .map_err(|e| DispatchError::Provider {
                provider: "smtp".to_string(),
                reason: format!("SMTP send failed: {e}"),
            })?;

        debug!(recipient = %email.recipient, "SMTP message sent");
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_provider_is_noop() {
        let provider = ManualProvider;
        assert!(provider.is_noop());
        assert_eq!(provider.name(), "manual");
    }
}
