//! File-backed inbox: one JSON document per message.
//!
//! Document shape:
//! ```json
//! {
//!   "email_id": "msg-001",
//!   "from": "pat@example.com",
//!   "to": "warranty@meridianappliance.example",
//!   "subject": "Broken dryer",
//!   "date": "2025-06-01T10:30:00Z",
//!   "body": "...",
//!   "attachments": ["receipt.jpg"],
//!   "attachment_text": "..."
//! }
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::IntakeError;
use crate::intake::{FetchBatch, MailSource, RawMessage, parse_message_date};

/// Reads messages from a directory of `*.json` files.
pub struct FileInbox {
    dir: PathBuf,
}

impl FileInbox {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn parse(id_hint: &str, raw: &str) -> Result<RawMessage, IntakeError> {
        // The `date` field arrives as a free-form string; parse it leniently
        // into the typed field.
        let mut value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| IntakeError::Malformed {
                id: id_hint.to_string(),
                reason: format!("invalid JSON: {e}"),
            })?;

        let date = value
            .get("date")
            .and_then(|d| d.as_str())
            .and_then(parse_message_date);
        if let Some(obj) = value.as_object_mut() {
            obj.remove("date");
        }

        let mut message: RawMessage =
            serde_json::from_value(value).map_err(|e| IntakeError::Malformed {
                id: id_hint.to_string(),
                reason: format!("missing or invalid fields: {e}"),
            })?;
        message.date = date;
        if message.id.is_empty() {
            message.id = id_hint.to_string();
        }
        Ok(message)
    }
}

#[async_trait]
impl MailSource for FileInbox {
    fn name(&self) -> &str {
        "file-inbox"
    }

    async fn fetch_all(&self) -> Result<FetchBatch, IntakeError> {
        if !self.dir.exists() {
            warn!(dir = %self.dir.display(), "Inbox directory does not exist");
            return Ok(FetchBatch::default());
        }

        let mut batch = FetchBatch::default();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("unknown")
                .to_string();
            let raw = fs::read_to_string(&path).await?;
            match Self::parse(&stem, &raw) {
                Ok(message) => batch.messages.push(message),
                Err(e) => {
                    // A bad file shouldn't block the rest of the inbox.
                    warn!(path = %path.display(), error = %e, "Unreadable message");
                    batch.failures.push((stem, e.to_string()));
                }
            }
        }

        batch.messages.sort_by(|a, b| a.id.cmp(&b.id));
        debug!(
            messages = batch.messages.len(),
            failures = batch.failures.len(),
            "Fetched inbox"
        );
        Ok(batch)
    }

    async fn fetch(&self, id: &str) -> Result<RawMessage, IntakeError> {
        let path = self.dir.join(format!("{id}.json"));
        if !path.exists() {
            return Err(IntakeError::NotFound(id.to_string()));
        }
        let raw = fs::read_to_string(&path).await?;
        Self::parse(id, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_message(dir: &std::path::Path, id: &str, body: &str) {
        let doc = serde_json::json!({
            "email_id": id,
            "from": "pat@example.com",
            "subject": "Claim",
            "date": "2025-06-01T10:30:00Z",
            "body": body,
            "attachments": ["receipt.jpg"],
        });
        std::fs::write(dir.join(format!("{id}.json")), doc.to_string()).unwrap();
    }

    #[tokio::test]
    async fn fetches_all_messages_sorted() {
        let tmp = TempDir::new().unwrap();
        write_message(tmp.path(), "msg-002", "second");
        write_message(tmp.path(), "msg-001", "first");

        let inbox = FileInbox::new(tmp.path().to_path_buf());
        let batch = inbox.fetch_all().await.unwrap();
        assert_eq!(batch.messages.len(), 2);
        assert!(batch.failures.is_empty());
        assert_eq!(batch.messages[0].id, "msg-001");
        assert_eq!(batch.messages[1].id, "msg-002");
        assert_eq!(
            batch.messages[0].date.unwrap().date_naive().to_string(),
            "2025-06-01"
        );
    }

    #[tokio::test]
    async fn fetch_missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let inbox = FileInbox::new(tmp.path().to_path_buf());
        let err = inbox.fetch("nope").await.unwrap_err();
        assert!(matches!(err, IntakeError::NotFound(_)));
    }

    #[tokio::test]
    async fn bad_json_is_reported_in_fetch_all() {
        let tmp = TempDir::new().unwrap();
        write_message(tmp.path(), "msg-001", "ok");
        std::fs::write(tmp.path().join("broken.json"), "{not json").unwrap();

        let inbox = FileInbox::new(tmp.path().to_path_buf());
        let batch = inbox.fetch_all().await.unwrap();
        assert_eq!(batch.messages.len(), 1);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].0, "broken");
    }

    #[tokio::test]
    async fn bad_json_is_malformed_in_fetch() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("broken.json"), "{not json").unwrap();
        let inbox = FileInbox::new(tmp.path().to_path_buf());
        let err = inbox.fetch("broken").await.unwrap_err();
        assert!(matches!(err, IntakeError::Malformed { .. }));
    }

    #[tokio::test]
    async fn missing_id_falls_back_to_file_stem() {
        let tmp = TempDir::new().unwrap();
        let doc = serde_json::json!({
            "from": "pat@example.com",
            "body": "hello",
        });
        std::fs::write(tmp.path().join("stem-id.json"), doc.to_string()).unwrap();
        let inbox = FileInbox::new(tmp.path().to_path_buf());
        let message = inbox.fetch("stem-id").await.unwrap();
        assert_eq!(message.id, "stem-id");
    }
}
