//! The claim record — the single aggregate threaded through every stage.

mod record;

pub use record::{
    AnalysisResult, ClaimRecord, ClaimStatus, DispatchReceipt, ExtractedFields, HumanDecision,
    Outputs, PolicyExcerpt, Recommendation, Resolution, Triage, TriageLabel,
};
