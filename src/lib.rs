//! Warranty Desk — a checkpointed decision pipeline for inbound
//! warranty-claim email.
//!
//! Claims move through triage, extraction, catalog/policy resolution,
//! retrieval-grounded analysis, a human review interrupt, and a dispatch
//! interrupt with idempotent outbound mail. Deterministic rules gate the
//! reasoning model at every step that must not be left to its discretion.

pub mod catalog;
pub mod claim;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod intake;
pub mod llm;
pub mod pipeline;
pub mod render;
pub mod retrieval;
pub mod store;
