//! Claim record types.
//!
//! Each stage replaces the sections it owns; nothing is merged in place.
//! Optional fields are meaningful: a `None` warranty validity means
//! "undetermined", which is not the same as `Some(false)`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::intake::RawMessage;

// ── Enums ───────────────────────────────────────────────────────────

/// First classification of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriageLabel {
    Claim,
    NonClaim,
    Spam,
}

impl std::fmt::Display for TriageLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Claim => write!(f, "CLAIM"),
            Self::NonClaim => write!(f, "NON_CLAIM"),
            Self::Spam => write!(f, "SPAM"),
        }
    }
}

impl TriageLabel {
    /// Parse a (possibly sloppy) label from a model response.
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "CLAIM" => Some(Self::Claim),
            "NON_CLAIM" | "NON-CLAIM" | "NONCLAIM" => Some(Self::NonClaim),
            "SPAM" => Some(Self::Spam),
            _ => None,
        }
    }
}

/// A recommendation or final decision on a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Approve,
    Reject,
    NeedInfo,
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approve => write!(f, "APPROVE"),
            Self::Reject => write!(f, "REJECT"),
            Self::NeedInfo => write!(f, "NEED_INFO"),
        }
    }
}

impl Recommendation {
    /// Parse a (possibly sloppy) value from a model response or CLI input.
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "APPROVE" | "APPROVED" => Some(Self::Approve),
            "REJECT" | "REJECTED" => Some(Self::Reject),
            "NEED_INFO" | "NEED-INFO" | "NEEDINFO" => Some(Self::NeedInfo),
            _ => None,
        }
    }
}

/// Coarse workflow status driving routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
    Pending,
    Triaged,
    Extracted,
    AwaitingReview,
    Reviewed,
    AwaitingEmail,
    Completed,
    Error,
}

impl std::fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Triaged => "TRIAGED",
            Self::Extracted => "EXTRACTED",
            Self::AwaitingReview => "AWAITING_REVIEW",
            Self::Reviewed => "REVIEWED",
            Self::AwaitingEmail => "AWAITING_EMAIL",
            Self::Completed => "COMPLETED",
            Self::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

// ── Sections ────────────────────────────────────────────────────────

/// Triage outcome. Set once; never re-derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Triage {
    pub label: TriageLabel,
    pub reason: String,
    pub confidence: f32,
}

/// Structured fields extracted from the claim message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_address: Option<String>,
    pub product_name: Option<String>,
    pub product_serial: Option<String>,
    pub purchase_date: Option<NaiveDate>,
    pub purchase_location: Option<String>,
    pub order_number: Option<String>,
    pub issue_description: Option<String>,
    #[serde(default)]
    pub has_proof_of_purchase: bool,
    #[serde(default)]
    pub missing_fields: Vec<String>,
}

impl ExtractedFields {
    /// At least one of email / phone / address.
    pub fn has_contact_method(&self) -> bool {
        self.customer_email.is_some()
            || self.customer_phone.is_some()
            || self.customer_address.is_some()
    }

    /// Completeness ratio over the ten extractable fields.
    pub fn filled_ratio(&self) -> f32 {
        let filled = [
            self.customer_name.is_some(),
            self.customer_email.is_some(),
            self.customer_phone.is_some(),
            self.customer_address.is_some(),
            self.product_name.is_some(),
            self.product_serial.is_some(),
            self.purchase_date.is_some(),
            self.purchase_location.is_some(),
            self.order_number.is_some(),
            self.issue_description.is_some(),
        ]
        .iter()
        .filter(|b| **b)
        .count();
        filled as f32 / 10.0
    }
}

/// Catalog product and policy version resolved for this claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub product_id: Option<String>,
    pub product_name: Option<String>,
    pub product_category: Option<String>,
    pub policy_id: Option<String>,
    pub policy_file: Option<String>,
    pub policy_version: Option<String>,
    pub policy_effective_date: Option<NaiveDate>,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub exclusion_keywords: Vec<String>,
    pub match_confidence: f32,
    pub reason: String,
}

/// A retrieved policy excerpt with provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyExcerpt {
    pub section: String,
    pub content: String,
    pub policy_id: String,
    pub policy_file: String,
    pub chunk_index: usize,
    pub distance: f32,
    /// Which query produced this excerpt ("issue", "terms", "fallback").
    pub query: String,
}

/// Analysis produced by the decision engine (or its reasoning fallback).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub recommendation: Recommendation,
    pub confidence: f32,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    pub reasoning: String,
    #[serde(default)]
    pub policy_references: Vec<String>,
    /// `None` means the warranty window could not be determined.
    pub warranty_valid: Option<bool>,
    pub warranty_details: String,
    #[serde(default)]
    pub exclusions_triggered: Vec<String>,
}

/// The human reviewer's decision at the first interrupt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanDecision {
    pub decision: Recommendation,
    pub notes: String,
    pub reviewer: String,
    pub decided_at: DateTime<Utc>,
}

/// Confirmation that the final customer communication was dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchReceipt {
    pub status: String,
    pub provider: String,
    pub dispatch_key: String,
    pub provider_message_id: String,
    pub duplicate: bool,
}

/// References to generated artifacts and the send confirmation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Outputs {
    pub review_packet_path: Option<String>,
    pub response_draft: Option<String>,
    pub response_path: Option<String>,
    /// Present only for approved claims, and only after manual generation.
    pub return_label_path: Option<String>,
    pub dispatch: Option<DispatchReceipt>,
}

// ── The record ──────────────────────────────────────────────────────

/// Complete state for one warranty claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRecord {
    /// Stable claim identifier — the checkpoint/resume key.
    pub claim_id: String,
    /// The raw inbound message. Immutable once ingested.
    pub message: RawMessage,
    pub triage: Option<Triage>,
    pub extracted: Option<ExtractedFields>,
    #[serde(default)]
    pub extraction_confidence: f32,
    pub resolution: Option<Resolution>,
    #[serde(default)]
    pub excerpts: Vec<PolicyExcerpt>,
    pub analysis: Option<AnalysisResult>,
    pub decision: Option<HumanDecision>,
    #[serde(default)]
    pub outputs: Outputs,
    pub status: ClaimStatus,
    /// Informational, not terminal, unless status is ERROR.
    pub error_message: Option<String>,
    /// Name of the model that produced LLM-derived sections, if any.
    pub model_used: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ClaimRecord {
    /// Create a fresh record for an inbound message.
    pub fn new(message: RawMessage) -> Self {
        let claim_id = format!(
            "CLM-{}-{}",
            Utc::now().format("%Y%m%d%H%M%S"),
            message.id
        );
        Self {
            claim_id,
            message,
            triage: None,
            extracted: None,
            extraction_confidence: 0.0,
            resolution: None,
            excerpts: Vec::new(),
            analysis: None,
            decision: None,
            outputs: Outputs::default(),
            status: ClaimStatus::Pending,
            error_message: None,
            model_used: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// The date against which the warranty window is evaluated:
    /// the message date when known, otherwise today.
    pub fn evaluation_date(&self) -> NaiveDate {
        self.message
            .date
            .map(|d| d.date_naive())
            .unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Where the customer response should go: the extracted customer
    /// email first, else the raw sender address.
    pub fn recipient(&self) -> Option<String> {
        if let Some(email) = self
            .extracted
            .as_ref()
            .and_then(|e| e.customer_email.as_deref())
        {
            let email = email.trim();
            if !email.is_empty() {
                return Some(email.to_string());
            }
        }
        let sender = self.message.from.trim();
        if sender.is_empty() {
            None
        } else {
            Some(sender.to_string())
        }
    }

    /// Resolved product name, falling back to the raw mention.
    pub fn product_display_name(&self) -> String {
        self.resolution
            .as_ref()
            .and_then(|r| r.product_name.clone())
            .or_else(|| {
                self.extracted
                    .as_ref()
                    .and_then(|e| e.product_name.clone())
            })
            .unwrap_or_else(|| "Unknown product".to_string())
    }

    /// Record a stage error without halting.
    pub fn note_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        match &mut self.error_message {
            Some(existing) => {
                existing.push_str("; ");
                existing.push_str(&message);
            }
            None => self.error_message = Some(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str) -> RawMessage {
        RawMessage {
            id: id.into(),
            from: "pat@example.com".into(),
            to: "warranty@meridianappliance.example".into(),
            subject: "My dryer broke".into(),
            date: Some("2025-06-01T09:00:00Z".parse().unwrap()),
            body: "It stopped heating.".into(),
            attachments: vec![],
            attachment_text: None,
        }
    }

    #[test]
    fn claim_id_embeds_message_id() {
        let record = ClaimRecord::new(message("msg-42"));
        assert!(record.claim_id.starts_with("CLM-"));
        assert!(record.claim_id.ends_with("-msg-42"));
        assert_eq!(record.status, ClaimStatus::Pending);
    }

    #[test]
    fn evaluation_date_prefers_message_date() {
        let record = ClaimRecord::new(message("msg-1"));
        assert_eq!(record.evaluation_date().to_string(), "2025-06-01");
    }

    #[test]
    fn recipient_prefers_extracted_email() {
        let mut record = ClaimRecord::new(message("msg-1"));
        record.extracted = Some(ExtractedFields {
            customer_email: Some("real@example.com".into()),
            ..Default::default()
        });
        assert_eq!(record.recipient().unwrap(), "real@example.com");
    }

    #[test]
    fn recipient_falls_back_to_sender() {
        let record = ClaimRecord::new(message("msg-1"));
        assert_eq!(record.recipient().unwrap(), "pat@example.com");
    }

    #[test]
    fn recipient_none_when_everything_blank() {
        let mut raw = message("msg-1");
        raw.from = "  ".into();
        let record = ClaimRecord::new(raw);
        assert!(record.recipient().is_none());
    }

    #[test]
    fn recommendation_parse_lenient() {
        assert_eq!(Recommendation::parse_lenient("approve"), Some(Recommendation::Approve));
        assert_eq!(Recommendation::parse_lenient(" REJECTED "), Some(Recommendation::Reject));
        assert_eq!(Recommendation::parse_lenient("need-info"), Some(Recommendation::NeedInfo));
        assert_eq!(Recommendation::parse_lenient("maybe"), None);
    }

    #[test]
    fn triage_label_parse_lenient() {
        assert_eq!(TriageLabel::parse_lenient("claim"), Some(TriageLabel::Claim));
        assert_eq!(TriageLabel::parse_lenient("NON-CLAIM"), Some(TriageLabel::NonClaim));
        assert_eq!(TriageLabel::parse_lenient("junk"), None);
    }

    #[test]
    fn filled_ratio_counts_fields() {
        let fields = ExtractedFields {
            customer_name: Some("Pat".into()),
            customer_email: Some("pat@example.com".into()),
            issue_description: Some("no heat".into()),
            ..Default::default()
        };
        assert!((fields.filled_ratio() - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn note_error_appends() {
        let mut record = ClaimRecord::new(message("msg-1"));
        record.note_error("first");
        record.note_error("second");
        assert_eq!(record.error_message.as_deref(), Some("first; second"));
    }

    #[test]
    fn record_round_trips_through_json() {
        let mut record = ClaimRecord::new(message("msg-1"));
        record.triage = Some(Triage {
            label: TriageLabel::Claim,
            reason: "warranty request".into(),
            confidence: 0.92,
        });
        let json = serde_json::to_string(&record).unwrap();
        let back: ClaimRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.claim_id, record.claim_id);
        assert_eq!(back.triage.unwrap().label, TriageLabel::Claim);
    }
}
