//! Backend-agnostic `Database` trait covering the three persistence
//! concerns of the desk:
//!
//! - **Checkpoints** — the (claim record, next stage) pair keyed by claim
//!   id that makes `advance` resumable across restarts.
//! - **Dispatch ledger** — the durable source of truth for outbound sends,
//!   upserted single-writer-wins by dispatch key.
//! - **Audit rows** — append-only upsert of processed claims by message
//!   id, with read paths for ids, decisions, and aggregate counts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::claim::ClaimRecord;
use crate::dispatch::DispatchRecord;
use crate::error::DatabaseError;
use crate::pipeline::Stage;

/// Aggregate decision counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecisionStats {
    pub total: u64,
    pub approved: u64,
    pub rejected: u64,
    pub need_info: u64,
}

/// A condensed audit row for listings.
#[derive(Debug, Clone)]
pub struct ClaimSummary {
    pub message_id: String,
    pub claim_id: String,
    pub decision: Option<String>,
    pub recommendation: Option<String>,
    pub customer_name: Option<String>,
    pub product_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Single async interface for all persistence.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Checkpoints ─────────────────────────────────────────────────

    /// Upsert the checkpoint for a claim: full record plus the next
    /// runnable stage (`None` once terminal).
    async fn save_checkpoint(
        &self,
        record: &ClaimRecord,
        next_stage: Option<Stage>,
    ) -> Result<(), DatabaseError>;

    /// Load a checkpoint by claim id.
    async fn load_checkpoint(
        &self,
        claim_id: &str,
    ) -> Result<Option<(ClaimRecord, Option<Stage>)>, DatabaseError>;

    /// All checkpointed claim ids with their next stage.
    async fn list_checkpoints(&self) -> Result<Vec<(String, Option<Stage>)>, DatabaseError>;

    // ── Dispatch ledger ─────────────────────────────────────────────

    /// Look up a dispatch record by its content-derived key.
    async fn get_dispatch(&self, key: &str) -> Result<Option<DispatchRecord>, DatabaseError>;

    /// Upsert a dispatch record by key. The key column carries a unique
    /// constraint so concurrent resumes collapse to a single row.
    async fn record_dispatch(&self, record: &DispatchRecord) -> Result<(), DatabaseError>;

    // ── Audit ───────────────────────────────────────────────────────

    /// Upsert the audit row for a claim, keyed by source message id.
    async fn upsert_claim(&self, record: &ClaimRecord) -> Result<(), DatabaseError>;

    /// All message ids with an audit row (drives inbox dedup).
    async fn processed_message_ids(&self) -> Result<Vec<String>, DatabaseError>;

    /// The recorded decision for a message id, if any.
    async fn decision_for(&self, message_id: &str) -> Result<Option<String>, DatabaseError>;

    /// Aggregate counts by decision.
    async fn stats(&self) -> Result<DecisionStats, DatabaseError>;

    /// Most recent audit rows, newest first.
    async fn recent_claims(&self, limit: usize) -> Result<Vec<ClaimSummary>, DatabaseError>;
}
