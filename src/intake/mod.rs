//! Mail intake — the raw-message type and the source trait.
//!
//! Connectors (IMAP, vendor APIs) live outside the core; the desk consumes
//! whatever a `MailSource` hands it, including pre-extracted attachment
//! text. The bundled `FileInbox` reads one JSON file per message.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::IntakeError;

mod file_inbox;

pub use file_inbox::FileInbox;

/// A raw inbound message as supplied by a mail source.
///
/// Immutable once ingested into a claim record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    /// Stable source-message identifier.
    #[serde(default, alias = "email_id")]
    pub id: String,
    /// Sender address.
    pub from: String,
    /// Recipient address.
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub subject: String,
    /// When the message was sent, if the source could parse it.
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub body: String,
    /// Attachment file names (content stays with the connector).
    #[serde(default)]
    pub attachments: Vec<String>,
    /// Text a connector extracted from attachments, if any.
    #[serde(default)]
    pub attachment_text: Option<String>,
}

impl RawMessage {
    /// Body plus attachment text, for text scans that should see both.
    pub fn combined_text(&self) -> String {
        match self.attachment_text.as_deref() {
            Some(extra) if !extra.trim().is_empty() => {
                format!("{}\n\n{}", self.body, extra)
            }
            _ => self.body.clone(),
        }
    }
}

/// Result of scanning a mail source: parsed messages plus per-message
/// failures (message id, reason). A failed message is an input error —
/// terminal for that message, recorded, never retried.
#[derive(Debug, Default)]
pub struct FetchBatch {
    pub messages: Vec<RawMessage>,
    pub failures: Vec<(String, String)>,
}

/// A source of inbound messages. Pure I/O, no claim logic.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Source name (e.g. "file-inbox").
    fn name(&self) -> &str;

    /// Fetch all currently available messages.
    async fn fetch_all(&self) -> Result<FetchBatch, IntakeError>;

    /// Fetch a single message by id.
    async fn fetch(&self, id: &str) -> Result<RawMessage, IntakeError>;
}

/// Parse a message date leniently: RFC 3339 first, then RFC 2822,
/// then a bare `YYYY-MM-DD`.
pub fn parse_message_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|ndt| ndt.and_utc());
    }
    warn!(raw, "Unparseable message date");
    None
}
