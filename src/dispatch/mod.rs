//! Idempotent outbound dispatch.
//!
//! Every send is keyed by `claimId:sha256(recipient ‖ subject ‖ body ‖
//! attachment name+size…)` and checked against the dispatch ledger before
//! any provider is contacted. The ledger — not the in-memory claim record —
//! is the durable source of truth, which is what makes duplicate resumes
//! after a restart safe.

mod providers;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::claim::ClaimRecord;
use crate::error::DatabaseError;
use crate::store::Database;

pub use providers::{MailProvider, ManualProvider, OutboundEmail, SmtpProvider};

// ── Ledger types ────────────────────────────────────────────────────

/// Terminal state of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchStatus {
    Sent,
    Skipped,
    Failed,
}

impl std::fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sent => write!(f, "SENT"),
            Self::Skipped => write!(f, "SKIPPED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

impl DispatchStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "SENT" => Self::Sent,
            "SKIPPED" => Self::Skipped,
            _ => Self::Failed,
        }
    }
}

/// One row in the dispatch ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub dispatch_key: String,
    pub claim_id: String,
    pub message_id: String,
    pub provider: String,
    pub recipient: String,
    pub subject: String,
    pub payload_hash: String,
    pub status: DispatchStatus,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a dispatch request, duplicate-aware.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub ok: bool,
    pub status: String,
    pub provider: String,
    pub dispatch_key: String,
    pub recipient: String,
    pub subject: String,
    pub provider_message_id: String,
    pub error: String,
    pub duplicate: bool,
}

// ── Key derivation ──────────────────────────────────────────────────

/// Hash the send payload: recipient, subject, body, then each attachment's
/// name and size.
pub fn payload_hash(
    recipient: &str,
    subject: &str,
    body: &str,
    attachments: &[(String, u64)],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(recipient.as_bytes());
    hasher.update(subject.as_bytes());
    hasher.update(body.as_bytes());
    for (name, size) in attachments {
        hasher.update(name.as_bytes());
        hasher.update(size.to_string().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Split a leading `Subject:` line off a draft, with a fallback subject.
pub fn parse_subject_and_body(draft: &str, fallback_subject: &str) -> (String, String) {
    let mut subject = fallback_subject.to_string();
    let mut body_start = 0;

    for (idx, line) in draft.lines().enumerate() {
        if line.to_lowercase().starts_with("subject:") {
            let value = line.splitn(2, ':').nth(1).unwrap_or("").trim();
            if !value.is_empty() {
                subject = value.to_string();
            }
            body_start = idx + 1;
            break;
        }
    }

    let body = draft
        .lines()
        .skip(body_start)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();
    if body.is_empty() {
        (subject, draft.trim().to_string())
    } else {
        (subject, body)
    }
}

// ── Dispatcher ──────────────────────────────────────────────────────

/// Ledger-checked dispatcher for the final customer communication.
pub struct Dispatcher {
    db: Arc<dyn Database>,
    provider: Arc<dyn MailProvider>,
    sender: String,
}

impl Dispatcher {
    pub fn new(db: Arc<dyn Database>, provider: Arc<dyn MailProvider>, sender: String) -> Self {
        Self {
            db,
            provider,
            sender,
        }
    }

    /// Send the claim's drafted response at most once per distinct payload.
    ///
    /// Ledger errors propagate — without the ledger no send is safe — but
    /// provider failures come back as a non-ok `DispatchResult`.
    pub async fn send_claim_response(
        &self,
        record: &ClaimRecord,
    ) -> Result<DispatchResult, DatabaseError> {
        let claim_id = record.claim_id.clone();
        let fallback_subject = format!("Warranty Claim Update - {claim_id}");
        let draft = record
            .outputs
            .response_draft
            .clone()
            .unwrap_or_default();
        let (subject, body) = parse_subject_and_body(&draft, &fallback_subject);
        let recipient = record.recipient().unwrap_or_default();

        let attachment_paths = collect_attachments(record);
        let attachment_meta: Vec<(String, u64)> = attachment_paths
            .iter()
            .map(|path| {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
                (name, size)
            })
            .collect();

        let hash = payload_hash(&recipient, &subject, &body, &attachment_meta);
        let dispatch_key = format!("{claim_id}:{hash}");

        // The ledger check must run even when the claim record itself has no
        // memory of a previous send — surviving memory loss is the point.
        if let Some(existing) = self.db.get_dispatch(&dispatch_key).await? {
            if existing.status == DispatchStatus::Sent {
                info!(dispatch_key = %dispatch_key, "Duplicate dispatch, already sent");
                return Ok(DispatchResult {
                    ok: true,
                    status: "SENT_DUPLICATE_SKIPPED".to_string(),
                    provider: existing.provider,
                    dispatch_key,
                    recipient,
                    subject,
                    provider_message_id: existing.provider_message_id.unwrap_or_default(),
                    error: String::new(),
                    duplicate: true,
                });
            }
        }

        let mut ledger_row = DispatchRecord {
            dispatch_key: dispatch_key.clone(),
            claim_id: claim_id.clone(),
            message_id: record.message.id.clone(),
            provider: self.provider.name().to_string(),
            recipient: recipient.clone(),
            subject: subject.clone(),
            payload_hash: hash,
            status: DispatchStatus::Failed,
            provider_message_id: None,
            error: None,
            created_at: Utc::now(),
        };

        if recipient.is_empty() {
            let err = "No recipient email found in claim record.".to_string();
            warn!(claim_id = %claim_id, "Dispatch failed: no recipient");
            ledger_row.error = Some(err.clone());
            self.db.record_dispatch(&ledger_row).await?;
            return Ok(DispatchResult {
                ok: false,
                status: DispatchStatus::Failed.to_string(),
                provider: self.provider.name().to_string(),
                dispatch_key,
                recipient,
                subject,
                provider_message_id: String::new(),
                error: err,
                duplicate: false,
            });
        }

        if self.provider.is_noop() {
            ledger_row.status = DispatchStatus::Skipped;
            self.db.record_dispatch(&ledger_row).await?;
            info!(claim_id = %claim_id, "Dispatch skipped (manual mode)");
            return Ok(DispatchResult {
                ok: true,
                status: DispatchStatus::Skipped.to_string(),
                provider: self.provider.name().to_string(),
                dispatch_key,
                recipient,
                subject,
                provider_message_id: String::new(),
                error: String::new(),
                duplicate: false,
            });
        }

        let outbound = OutboundEmail {
            sender: self.sender.clone(),
            recipient: recipient.clone(),
            subject: subject.clone(),
            body,
            attachments: attachment_paths,
        };

        match self.provider.send(&outbound).await {
            Ok(provider_message_id) => {
                ledger_row.status = DispatchStatus::Sent;
                ledger_row.provider_message_id = Some(provider_message_id.clone());
                self.db.record_dispatch(&ledger_row).await?;
                info!(
                    claim_id = %claim_id,
                    provider = self.provider.name(),
                    "Dispatch sent"
                );
                Ok(DispatchResult {
                    ok: true,
                    status: DispatchStatus::Sent.to_string(),
                    provider: self.provider.name().to_string(),
                    dispatch_key,
                    recipient,
                    subject,
                    provider_message_id,
                    error: String::new(),
                    duplicate: false,
                })
            }
            Err(e) => {
                let err = e.to_string();
                warn!(claim_id = %claim_id, error = %err, "Dispatch failed");
                ledger_row.error = Some(err.clone());
                self.db.record_dispatch(&ledger_row).await?;
                Ok(DispatchResult {
                    ok: false,
                    status: DispatchStatus::Failed.to_string(),
                    provider: self.provider.name().to_string(),
                    dispatch_key,
                    recipient,
                    subject,
                    provider_message_id: String::new(),
                    error: err,
                    duplicate: false,
                })
            }
        }
    }
}

/// Attachments for the outbound send: the return label, when present.
fn collect_attachments(record: &ClaimRecord) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(label) = &record.outputs.return_label_path {
        let path = PathBuf::from(label);
        if path.exists() {
            paths.push(path);
        }
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_hash_is_stable_and_sensitive() {
        let a = payload_hash("r@x.com", "Subject", "Body", &[("label.txt".into(), 120)]);
        let b = payload_hash("r@x.com", "Subject", "Body", &[("label.txt".into(), 120)]);
        let c = payload_hash("r@x.com", "Subject", "Body!", &[("label.txt".into(), 120)]);
        let d = payload_hash("r@x.com", "Subject", "Body", &[("label.txt".into(), 121)]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn subject_line_is_split_from_body() {
        let draft = "Subject: Claim Approved - CLM-1\n\nDear Pat,\nGood news.";
        let (subject, body) = parse_subject_and_body(draft, "Fallback");
        assert_eq!(subject, "Claim Approved - CLM-1");
        assert_eq!(body, "Dear Pat,\nGood news.");
    }

    #[test]
    fn missing_subject_uses_fallback() {
        let draft = "Dear Pat,\nGood news.";
        let (subject, body) = parse_subject_and_body(draft, "Fallback");
        assert_eq!(subject, "Fallback");
        assert_eq!(body, "Dear Pat,\nGood news.");
    }

    #[test]
    fn empty_subject_value_uses_fallback() {
        let draft = "Subject:   \nDear Pat,";
        let (subject, body) = parse_subject_and_body(draft, "Fallback");
        assert_eq!(subject, "Fallback");
        assert_eq!(body, "Dear Pat,");
    }

    #[test]
    fn dispatch_status_round_trips() {
        for status in [DispatchStatus::Sent, DispatchStatus::Skipped, DispatchStatus::Failed] {
            assert_eq!(DispatchStatus::parse(&status.to_string()), status);
        }
        assert_eq!(DispatchStatus::parse("garbage"), DispatchStatus::Failed);
    }
}
