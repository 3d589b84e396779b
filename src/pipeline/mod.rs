//! The claim pipeline: stages, routing, interrupts, checkpointed resume.
//!
//! Stages are pure-ish transformations over the claim record composed by
//! an explicit routing table. The orchestrator is the single re-entrant
//! entry point; resume may happen in a different process entirely, so
//! suspension is a persisted (claim id → record + next stage) pair, never
//! an in-memory coroutine.

mod extract;
mod orchestrator;
mod triage;

pub use extract::{deterministic_extract, identify_missing_fields, normalize_date};
pub use orchestrator::Orchestrator;
pub use triage::spam_indicator_count;

use serde::{Deserialize, Serialize};

use crate::claim::{ClaimRecord, Recommendation, TriageLabel};

/// A runnable pipeline stage. The checkpoint stores the next one due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Triage,
    Extract,
    ResolvePolicy,
    RetrieveExcerpts,
    Analyze,
    ReviewPacket,
    HumanReview,
    DraftResponse,
    EmailGate,
    Dispatch,
    Finalize,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Triage => "triage",
            Self::Extract => "extract",
            Self::ResolvePolicy => "resolve_policy",
            Self::RetrieveExcerpts => "retrieve_excerpts",
            Self::Analyze => "analyze",
            Self::ReviewPacket => "review_packet",
            Self::HumanReview => "human_review",
            Self::DraftResponse => "draft_response",
            Self::EmailGate => "email_gate",
            Self::Dispatch => "dispatch",
            Self::Finalize => "finalize",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "triage" => Ok(Self::Triage),
            "extract" => Ok(Self::Extract),
            "resolve_policy" => Ok(Self::ResolvePolicy),
            "retrieve_excerpts" => Ok(Self::RetrieveExcerpts),
            "analyze" => Ok(Self::Analyze),
            "review_packet" => Ok(Self::ReviewPacket),
            "human_review" => Ok(Self::HumanReview),
            "draft_response" => Ok(Self::DraftResponse),
            "email_gate" => Ok(Self::EmailGate),
            "dispatch" => Ok(Self::Dispatch),
            "finalize" => Ok(Self::Finalize),
            other => Err(format!("Unknown stage: {other}")),
        }
    }
}

/// Routing table: which stage runs after `stage`, given the record.
///
/// The two conditional edges:
/// - after triage, only CLAIM messages continue to extraction;
/// - the dispatch stage is reachable only through the email gate.
pub fn next_stage(stage: Stage, record: &ClaimRecord) -> Option<Stage> {
    match stage {
        Stage::Triage => {
            let is_claim = record
                .triage
                .as_ref()
                .map(|t| t.label == TriageLabel::Claim)
                .unwrap_or(false);
            if is_claim {
                Some(Stage::Extract)
            } else {
                Some(Stage::Finalize)
            }
        }
        Stage::Extract => Some(Stage::ResolvePolicy),
        Stage::ResolvePolicy => Some(Stage::RetrieveExcerpts),
        Stage::RetrieveExcerpts => Some(Stage::Analyze),
        // Always through the review packet: no auto-approve path exists,
        // whatever the analysis confidence.
        Stage::Analyze => Some(Stage::ReviewPacket),
        Stage::ReviewPacket => Some(Stage::HumanReview),
        Stage::HumanReview => Some(Stage::DraftResponse),
        Stage::DraftResponse => Some(Stage::EmailGate),
        Stage::EmailGate => Some(Stage::Dispatch),
        Stage::Dispatch => Some(Stage::Finalize),
        Stage::Finalize => None,
    }
}

/// The two pipeline interrupts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Waiting for the human decision.
    Review,
    /// Waiting for dispatch confirmation.
    Dispatch,
}

/// Input injected when resuming a suspended claim.
#[derive(Debug, Clone)]
pub enum ResumeInput {
    /// Replay from the checkpoint with nothing new.
    None,
    /// The human decision, satisfying the review interrupt.
    Decision {
        decision: Recommendation,
        notes: String,
        reviewer: String,
    },
    /// Confirmation to leave the dispatch interrupt and send.
    ConfirmDispatch,
}

/// What `advance` came back with.
#[derive(Debug)]
pub enum Advance {
    /// The claim is parked at an interrupt.
    Interrupted(Interrupt, ClaimRecord),
    /// The claim reached a terminal state (COMPLETED, or triaged away).
    Done(ClaimRecord),
    /// A stage failure stopped routing; the claim is inspectable and
    /// resumable once the fault is fixed.
    Halted(ClaimRecord),
}

impl Advance {
    pub fn record(&self) -> &ClaimRecord {
        match self {
            Self::Interrupted(_, record) | Self::Done(record) | Self::Halted(record) => record,
        }
    }
}
