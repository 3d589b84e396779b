//! The pipeline orchestrator: a single re-entrant `advance` entry point
//! over checkpointed claim state.
//!
//! Each call executes all runnable stages until an interrupt or terminal
//! state, persisting a checkpoint before every return. Side-effecting
//! stages skip themselves when their output is already present, so
//! replaying an identical checkpoint is a no-op with respect to side
//! effects; the dispatch stage is additionally ledger-idempotent.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::catalog::Resolver;
use crate::claim::{
    ClaimRecord, ClaimStatus, DispatchReceipt, HumanDecision, Recommendation, Triage, TriageLabel,
};
use crate::dispatch::Dispatcher;
use crate::engine::DecisionEngine;
use crate::error::PipelineError;
use crate::intake::{FetchBatch, RawMessage};
use crate::llm::ReasoningProvider;
use crate::pipeline::triage::{SPAM_THRESHOLD, spam_indicator_count};
use crate::pipeline::{
    Advance, Interrupt, ResumeInput, Stage, deterministic_extract, next_stage,
};
use crate::render::Artifacts;
use crate::retrieval::Retriever;
use crate::store::Database;

/// Drives claim records through the stage graph.
///
/// All collaborators are injected, so tests run against deterministic
/// fakes. One claim is advanced end-to-end by one logical task; the only
/// cross-claim shared state lives in the policy index and the database.
pub struct Orchestrator {
    db: Arc<dyn Database>,
    reasoner: Arc<dyn ReasoningProvider>,
    resolver: Arc<Resolver>,
    retriever: Arc<Retriever>,
    engine: DecisionEngine,
    artifacts: Arc<dyn Artifacts>,
    dispatcher: Arc<Dispatcher>,
    llm_timeout: Duration,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<dyn Database>,
        reasoner: Arc<dyn ReasoningProvider>,
        resolver: Arc<Resolver>,
        retriever: Arc<Retriever>,
        engine: DecisionEngine,
        artifacts: Arc<dyn Artifacts>,
        dispatcher: Arc<Dispatcher>,
        llm_timeout: Duration,
    ) -> Self {
        Self {
            db,
            reasoner,
            resolver,
            retriever,
            engine,
            artifacts,
            dispatcher,
            llm_timeout,
        }
    }

    /// Register a new inbound message as a claim. Returns the claim id;
    /// call `advance` to start processing.
    pub async fn start(&self, message: RawMessage) -> Result<String, PipelineError> {
        let record = ClaimRecord::new(message);
        let claim_id = record.claim_id.clone();
        self.db.save_checkpoint(&record, Some(Stage::Triage)).await?;
        info!(claim_id = %claim_id, message_id = %record.message.id, "Claim registered");
        Ok(claim_id)
    }

    /// Register and advance every not-yet-seen message in a fetch batch,
    /// and record its unreadable messages as terminal ERROR claims.
    /// Failures on individual messages are logged but don't fail the batch.
    pub async fn intake(&self, batch: FetchBatch) -> Result<Vec<Advance>, PipelineError> {
        let mut known: HashSet<String> = self
            .db
            .processed_message_ids()
            .await?
            .into_iter()
            .collect();
        for (claim_id, _) in self.db.list_checkpoints().await? {
            if let Some((record, _)) = self.db.load_checkpoint(&claim_id).await? {
                known.insert(record.message.id);
            }
        }

        for (message_id, reason) in &batch.failures {
            if known.insert(message_id.clone()) {
                self.record_input_error(message_id, reason).await?;
            }
        }

        let mut results = Vec::new();
        for message in batch.messages {
            if known.contains(&message.id) {
                debug!(message_id = %message.id, "Message already tracked, skipping");
                continue;
            }
            known.insert(message.id.clone());
            let claim_id = self.start(message).await?;
            match self.advance(&claim_id, ResumeInput::None).await {
                Ok(advance) => results.push(advance),
                Err(e) => {
                    error!(claim_id = %claim_id, error = %e, "Failed to advance claim in batch");
                }
            }
        }
        Ok(results)
    }

    /// Record a message that could not be ingested as a terminal ERROR
    /// claim: durable, inspectable, never retried.
    pub async fn record_input_error(
        &self,
        message_id: &str,
        reason: &str,
    ) -> Result<String, PipelineError> {
        let mut record = ClaimRecord::new(RawMessage {
            id: message_id.to_string(),
            from: String::new(),
            to: String::new(),
            subject: String::new(),
            date: None,
            body: String::new(),
            attachments: Vec::new(),
            attachment_text: None,
        });
        record.status = ClaimStatus::Error;
        record.error_message = Some(reason.to_string());
        let claim_id = record.claim_id.clone();
        self.db.save_checkpoint(&record, None).await?;
        warn!(claim_id = %claim_id, message_id = %message_id, reason, "Unreadable message recorded as ERROR claim");
        Ok(claim_id)
    }

    /// Load a claim's current record and next runnable stage.
    pub async fn inspect(
        &self,
        claim_id: &str,
    ) -> Result<(ClaimRecord, Option<Stage>), PipelineError> {
        self.db
            .load_checkpoint(claim_id)
            .await?
            .ok_or_else(|| PipelineError::UnknownClaim(claim_id.to_string()))
    }

    /// Execute all runnable stages for a claim until an interrupt or a
    /// terminal state, injecting `input` where the routing expects it.
    pub async fn advance(
        &self,
        claim_id: &str,
        input: ResumeInput,
    ) -> Result<Advance, PipelineError> {
        let Some((mut record, mut next)) = self.db.load_checkpoint(claim_id).await? else {
            return Err(PipelineError::UnknownClaim(claim_id.to_string()));
        };
        let mut input = input;

        loop {
            let Some(stage) = next else {
                return Ok(Advance::Done(record));
            };
            debug!(claim_id = %claim_id, stage = %stage, "Running stage");

            match stage {
                Stage::HumanReview => {
                    match std::mem::replace(&mut input, ResumeInput::None) {
                        ResumeInput::Decision {
                            decision,
                            notes,
                            reviewer,
                        } => {
                            info!(claim_id = %claim_id, decision = %decision, reviewer = %reviewer, "Human decision recorded");
                            record.decision = Some(HumanDecision {
                                decision,
                                notes,
                                reviewer,
                                decided_at: Utc::now(),
                            });
                            record.status = ClaimStatus::Reviewed;
                            next = next_stage(stage, &record);
                            self.db.save_checkpoint(&record, next).await?;
                        }
                        _ => {
                            record.status = ClaimStatus::AwaitingReview;
                            self.db.save_checkpoint(&record, Some(stage)).await?;
                            return Ok(Advance::Interrupted(Interrupt::Review, record));
                        }
                    }
                }

                Stage::EmailGate => {
                    record.status = ClaimStatus::AwaitingEmail;
                    match std::mem::replace(&mut input, ResumeInput::None) {
                        ResumeInput::ConfirmDispatch => {
                            let approved = record
                                .decision
                                .as_ref()
                                .map(|d| d.decision == Recommendation::Approve)
                                .unwrap_or(false);
                            // For approvals the gate is not satisfiable until
                            // a label reference exists.
                            if approved && record.outputs.return_label_path.is_none() {
                                self.db.save_checkpoint(&record, Some(stage)).await?;
                                return Err(PipelineError::LabelRequired(claim_id.to_string()));
                            }
                            next = next_stage(stage, &record);
                            self.db.save_checkpoint(&record, next).await?;
                        }
                        _ => {
                            self.db.save_checkpoint(&record, Some(stage)).await?;
                            return Ok(Advance::Interrupted(Interrupt::Dispatch, record));
                        }
                    }
                }

                Stage::Dispatch => {
                    let result = self
                        .dispatcher
                        .send_claim_response(&record)
                        .await
                        .map_err(PipelineError::Database)?;
                    record.outputs.dispatch = Some(DispatchReceipt {
                        status: result.status.clone(),
                        provider: result.provider.clone(),
                        dispatch_key: result.dispatch_key.clone(),
                        provider_message_id: result.provider_message_id.clone(),
                        duplicate: result.duplicate,
                    });
                    if result.ok {
                        next = next_stage(stage, &record);
                        self.db.save_checkpoint(&record, next).await?;
                    } else {
                        // Failed dispatch parks the claim back at the gate;
                        // re-confirming retries under the same dispatch key.
                        warn!(claim_id = %claim_id, error = %result.error, "Dispatch failed; claim stays at email gate");
                        record.note_error(format!("Dispatch failed: {}", result.error));
                        record.status = ClaimStatus::AwaitingEmail;
                        self.db
                            .save_checkpoint(&record, Some(Stage::EmailGate))
                            .await?;
                        return Ok(Advance::Interrupted(Interrupt::Dispatch, record));
                    }
                }

                _ => match self.run_stage(stage, &mut record).await {
                    Ok(()) => {
                        next = next_stage(stage, &record);
                        self.db.save_checkpoint(&record, next).await?;
                    }
                    Err(e) => {
                        // The checkpoint store is load-bearing: its errors
                        // propagate instead of degrading.
                        if matches!(e, PipelineError::Database(_)) {
                            return Err(e);
                        }
                        warn!(claim_id = %claim_id, stage = %stage, error = %e, "Stage failed");
                        record.note_error(format!("{stage} failed: {e}"));
                        if stage_is_fatal(stage) {
                            record.status = ClaimStatus::Error;
                            self.db.save_checkpoint(&record, Some(stage)).await?;
                            return Ok(Advance::Halted(record));
                        }
                        next = next_stage(stage, &record);
                        self.db.save_checkpoint(&record, next).await?;
                    }
                },
            }
        }
    }

    /// Manually generate the return label for an APPROVE claim parked at
    /// the dispatch interrupt. Idempotent: an existing label is returned
    /// as-is.
    pub async fn generate_label(&self, claim_id: &str) -> Result<String, PipelineError> {
        let (mut record, next) = self.inspect(claim_id).await?;

        if next != Some(Stage::EmailGate) {
            return Err(PipelineError::NotInterrupted {
                claim_id: claim_id.to_string(),
                expected: "dispatch confirmation".to_string(),
            });
        }
        let approved = record
            .decision
            .as_ref()
            .map(|d| d.decision == Recommendation::Approve)
            .unwrap_or(false);
        if !approved {
            return Err(PipelineError::Stage {
                stage: "return_label".to_string(),
                reason: "only APPROVE claims get a return label".to_string(),
            });
        }

        if let Some(existing) = &record.outputs.return_label_path {
            return Ok(existing.clone());
        }

        let path = self.artifacts.return_label(&record).await?;
        record.outputs.return_label_path = Some(path.clone());
        self.db
            .save_checkpoint(&record, Some(Stage::EmailGate))
            .await?;
        Ok(path)
    }

    // ── Stage implementations ───────────────────────────────────────

    async fn run_stage(
        &self,
        stage: Stage,
        record: &mut ClaimRecord,
    ) -> Result<(), PipelineError> {
        match stage {
            Stage::Triage => self.stage_triage(record).await,
            Stage::Extract => self.stage_extract(record).await,
            Stage::ResolvePolicy => self.stage_resolve(record),
            Stage::RetrieveExcerpts => self.stage_retrieve(record).await,
            Stage::Analyze => {
                self.engine.analyze(record).await;
                Ok(())
            }
            Stage::ReviewPacket => self.stage_review_packet(record).await,
            Stage::DraftResponse => self.stage_draft(record).await,
            Stage::Finalize => self.stage_finalize(record).await,
            // Interrupts and dispatch are handled in `advance` directly.
            Stage::HumanReview | Stage::EmailGate | Stage::Dispatch => Ok(()),
        }
    }

    async fn stage_triage(&self, record: &mut ClaimRecord) -> Result<(), PipelineError> {
        // Triage is set once; a replay never re-derives it.
        if record.triage.is_none() {
            let spam_hits = spam_indicator_count(&record.message);
            let triage = if spam_hits >= SPAM_THRESHOLD {
                Triage {
                    label: TriageLabel::Spam,
                    reason: "Multiple spam indicators detected".to_string(),
                    confidence: 0.95,
                }
            } else {
                match tokio::time::timeout(
                    self.llm_timeout,
                    self.reasoner.classify(&record.message),
                )
                .await
                {
                    Ok(Ok(wire)) => {
                        record.model_used = Some(self.reasoner.model_name().to_string());
                        let label = TriageLabel::parse_lenient(&wire.classification)
                            .unwrap_or(TriageLabel::Claim);
                        Triage {
                            label,
                            reason: if wire.reason.is_empty() {
                                "Model classification".to_string()
                            } else {
                                wire.reason
                            },
                            confidence: wire.confidence.unwrap_or(0.8),
                        }
                    }
                    Ok(Err(e)) => conservative_triage(&e.to_string()),
                    Err(_) => conservative_triage("classifier timed out"),
                }
            };
            info!(
                claim_id = %record.claim_id,
                label = %triage.label,
                confidence = triage.confidence,
                "Message triaged"
            );
            record.triage = Some(triage);
        }
        record.status = ClaimStatus::Triaged;
        Ok(())
    }

    async fn stage_extract(&self, record: &mut ClaimRecord) -> Result<(), PipelineError> {
        let fields = match tokio::time::timeout(
            self.llm_timeout,
            self.reasoner.extract(&record.message),
        )
        .await
        {
            Ok(Ok(wire)) => {
                record.model_used = Some(self.reasoner.model_name().to_string());
                crate::pipeline::extract::refine_wire_extraction(
                    wire,
                    &record.message,
                    self.resolver.products(),
                )
            }
            Ok(Err(e)) => {
                record.note_error(format!("Extraction used deterministic fallback: {e}"));
                deterministic_extract(&record.message, self.resolver.products())
            }
            Err(_) => {
                record.note_error("Extraction used deterministic fallback: model timed out");
                deterministic_extract(&record.message, self.resolver.products())
            }
        };
        record.extraction_confidence = fields.filled_ratio();
        record.extracted = Some(fields);
        record.status = ClaimStatus::Extracted;
        Ok(())
    }

    fn stage_resolve(&self, record: &mut ClaimRecord) -> Result<(), PipelineError> {
        let extracted = record.extracted.clone().unwrap_or_default();
        let resolution = self.resolver.resolve(
            extracted.product_name.as_deref(),
            extracted.product_serial.as_deref(),
            extracted.purchase_date,
        );
        debug!(
            claim_id = %record.claim_id,
            product_id = ?resolution.product_id,
            confidence = resolution.match_confidence,
            "Product resolved"
        );
        record.resolution = Some(resolution);
        Ok(())
    }

    async fn stage_retrieve(&self, record: &mut ClaimRecord) -> Result<(), PipelineError> {
        match self.retriever.retrieve(record).await {
            Ok(excerpts) => {
                record.excerpts = excerpts;
            }
            Err(e) => {
                // Retrieval degrades to no excerpts, never to a dead claim.
                warn!(claim_id = %record.claim_id, error = %e, "Retrieval failed");
                record.excerpts = Vec::new();
                record.note_error(format!("Retrieval error: {e}"));
            }
        }
        Ok(())
    }

    async fn stage_review_packet(&self, record: &mut ClaimRecord) -> Result<(), PipelineError> {
        if record.outputs.review_packet_path.is_none() {
            let doc = self.artifacts.review_packet(record).await?;
            record.outputs.review_packet_path = Some(doc.path);
        }
        record.status = ClaimStatus::AwaitingReview;
        Ok(())
    }

    async fn stage_draft(&self, record: &mut ClaimRecord) -> Result<(), PipelineError> {
        if record.outputs.response_draft.is_none() {
            let decision = record
                .decision
                .as_ref()
                .map(|d| d.decision)
                .unwrap_or(Recommendation::NeedInfo);
            let doc = self.artifacts.customer_response(record, decision).await?;
            record.outputs.response_draft = Some(doc.content);
            record.outputs.response_path = Some(doc.path);
        }
        Ok(())
    }

    async fn stage_finalize(&self, record: &mut ClaimRecord) -> Result<(), PipelineError> {
        record.status = ClaimStatus::Completed;
        record.completed_at = Some(Utc::now());
        self.db.upsert_claim(record).await?;
        if let Err(e) = self.artifacts.claim_summary(record).await {
            record.note_error(format!("Summary write failed: {e}"));
        }
        info!(claim_id = %record.claim_id, "Claim completed");
        Ok(())
    }
}

fn conservative_triage(reason: &str) -> Triage {
    Triage {
        label: TriageLabel::Claim,
        reason: format!("Classifier unavailable, defaulting to CLAIM: {reason}"),
        confidence: 0.5,
    }
}

/// Stages whose failure leaves mandatory downstream fields unpopulated.
fn stage_is_fatal(stage: Stage) -> bool {
    matches!(stage, Stage::DraftResponse | Stage::Finalize)
}
