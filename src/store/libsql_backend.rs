//! libSQL backend — async `Database` trait implementation.
//!
//! A single connection is reused for all operations; `libsql::Connection`
//! is `Send + Sync` and safe for concurrent async use. Local file and
//! in-memory databases are supported.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;

use crate::claim::ClaimRecord;
use crate::dispatch::{DispatchRecord, DispatchStatus};
use crate::error::DatabaseError;
use crate::pipeline::Stage;
use crate::store::migrations;
use crate::store::traits::{ClaimSummary, Database, DecisionStats};

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to create in-memory database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn query_err(e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(e.to_string())
}

/// Parse an RFC 3339 datetime string, defaulting to the epoch floor.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn row_to_dispatch(row: &libsql::Row) -> Result<DispatchRecord, DatabaseError> {
    Ok(DispatchRecord {
        dispatch_key: row.get::<String>(0).map_err(query_err)?,
        claim_id: row.get::<String>(1).map_err(query_err)?,
        message_id: row.get::<String>(2).unwrap_or_default(),
        provider: row.get::<String>(3).map_err(query_err)?,
        recipient: row.get::<String>(4).unwrap_or_default(),
        subject: row.get::<String>(5).unwrap_or_default(),
        payload_hash: row.get::<String>(6).map_err(query_err)?,
        status: DispatchStatus::parse(&row.get::<String>(7).map_err(query_err)?),
        provider_message_id: row.get::<String>(8).ok(),
        error: row.get::<String>(9).ok(),
        created_at: parse_datetime(&row.get::<String>(10).unwrap_or_default()),
    })
}

fn row_to_summary(row: &libsql::Row) -> Result<ClaimSummary, DatabaseError> {
    Ok(ClaimSummary {
        message_id: row.get::<String>(0).map_err(query_err)?,
        claim_id: row.get::<String>(1).map_err(query_err)?,
        decision: row.get::<String>(2).ok(),
        recommendation: row.get::<String>(3).ok(),
        customer_name: row.get::<String>(4).ok(),
        product_name: row.get::<String>(5).ok(),
        timestamp: parse_datetime(&row.get::<String>(6).unwrap_or_default()),
    })
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run(self.conn()).await
    }

    // ── Checkpoints ─────────────────────────────────────────────────

    async fn save_checkpoint(
        &self,
        record: &ClaimRecord,
        next_stage: Option<Stage>,
    ) -> Result<(), DatabaseError> {
        let payload = serde_json::to_string(record)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.conn()
            .execute(
                "INSERT INTO checkpoints (claim_id, record, next_stage, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(claim_id) DO UPDATE SET
                     record = excluded.record,
                     next_stage = excluded.next_stage,
                     updated_at = excluded.updated_at",
                params![
                    record.claim_id.clone(),
                    payload,
                    next_stage.map(|s| s.to_string()),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn load_checkpoint(
        &self,
        claim_id: &str,
    ) -> Result<Option<(ClaimRecord, Option<Stage>)>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT record, next_stage FROM checkpoints WHERE claim_id = ?1",
                params![claim_id],
            )
            .await
            .map_err(query_err)?;

        let Some(row) = rows.next().await.map_err(query_err)? else {
            return Ok(None);
        };

        let payload: String = row.get(0).map_err(query_err)?;
        let record: ClaimRecord = serde_json::from_str(&payload)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let next_stage = row
            .get::<String>(1)
            .ok()
            .and_then(|s| s.parse::<Stage>().ok());
        Ok(Some((record, next_stage)))
    }

    async fn list_checkpoints(&self) -> Result<Vec<(String, Option<Stage>)>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT claim_id, next_stage FROM checkpoints ORDER BY updated_at DESC",
                (),
            )
            .await
            .map_err(query_err)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let claim_id: String = row.get(0).map_err(query_err)?;
            let next_stage = row
                .get::<String>(1)
                .ok()
                .and_then(|s| s.parse::<Stage>().ok());
            out.push((claim_id, next_stage));
        }
        Ok(out)
    }

    // ── Dispatch ledger ─────────────────────────────────────────────

    async fn get_dispatch(&self, key: &str) -> Result<Option<DispatchRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT dispatch_key, claim_id, message_id, provider, recipient, subject,
                        payload_hash, status, provider_message_id, error, created_at
                 FROM dispatches WHERE dispatch_key = ?1",
                params![key],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_dispatch(&row)?)),
            None => Ok(None),
        }
    }

    async fn record_dispatch(&self, record: &DispatchRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO dispatches (dispatch_key, claim_id, message_id, provider,
                        recipient, subject, payload_hash, status, provider_message_id,
                        error, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(dispatch_key) DO UPDATE SET
                     provider = excluded.provider,
                     status = excluded.status,
                     provider_message_id = excluded.provider_message_id,
                     error = excluded.error,
                     created_at = excluded.created_at",
                params![
                    record.dispatch_key.clone(),
                    record.claim_id.clone(),
                    record.message_id.clone(),
                    record.provider.clone(),
                    record.recipient.clone(),
                    record.subject.clone(),
                    record.payload_hash.clone(),
                    record.status.to_string(),
                    record.provider_message_id.clone(),
                    record.error.clone(),
                    record.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    // ── Audit ───────────────────────────────────────────────────────

    async fn upsert_claim(&self, record: &ClaimRecord) -> Result<(), DatabaseError> {
        let extracted = record.extracted.clone().unwrap_or_default();
        let analysis = record.analysis.as_ref();
        let resolution = record.resolution.as_ref();
        let full_record = serde_json::to_string(record)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        self.conn()
            .execute(
                "INSERT INTO claims (message_id, claim_id, decision, recommendation,
                        confidence, customer_name, customer_email, product_name,
                        product_id, issue_description, warranty_valid, policy_id,
                        policy_version, reviewer, notes, timestamp, full_record)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
                 ON CONFLICT(message_id) DO UPDATE SET
                     claim_id = excluded.claim_id,
                     decision = excluded.decision,
                     recommendation = excluded.recommendation,
                     confidence = excluded.confidence,
                     customer_name = excluded.customer_name,
                     customer_email = excluded.customer_email,
                     product_name = excluded.product_name,
                     product_id = excluded.product_id,
                     issue_description = excluded.issue_description,
                     warranty_valid = excluded.warranty_valid,
                     policy_id = excluded.policy_id,
                     policy_version = excluded.policy_version,
                     reviewer = excluded.reviewer,
                     notes = excluded.notes,
                     timestamp = excluded.timestamp,
                     full_record = excluded.full_record",
                params![
                    record.message.id.clone(),
                    record.claim_id.clone(),
                    record.decision.as_ref().map(|d| d.decision.to_string()),
                    analysis.map(|a| a.recommendation.to_string()),
                    analysis.map(|a| a.confidence as f64),
                    extracted.customer_name.clone(),
                    extracted.customer_email.clone(),
                    resolution.and_then(|r| r.product_name.clone()),
                    resolution.and_then(|r| r.product_id.clone()),
                    extracted.issue_description.clone(),
                    analysis.and_then(|a| a.warranty_valid).map(i64::from),
                    resolution.and_then(|r| r.policy_id.clone()),
                    resolution.and_then(|r| r.policy_version.clone()),
                    record.decision.as_ref().map(|d| d.reviewer.clone()),
                    record.decision.as_ref().map(|d| d.notes.clone()),
                    Utc::now().to_rfc3339(),
                    full_record,
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn processed_message_ids(&self) -> Result<Vec<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT message_id FROM claims", ())
            .await
            .map_err(query_err)?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            ids.push(row.get::<String>(0).map_err(query_err)?);
        }
        Ok(ids)
    }

    async fn decision_for(&self, message_id: &str) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT decision FROM claims WHERE message_id = ?1",
                params![message_id],
            )
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(row.get::<String>(0).ok()),
            None => Ok(None),
        }
    }

    async fn stats(&self) -> Result<DecisionStats, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT
                    COUNT(*),
                    COALESCE(SUM(decision = 'APPROVE'), 0),
                    COALESCE(SUM(decision = 'REJECT'), 0),
                    COALESCE(SUM(decision = 'NEED_INFO'), 0)
                 FROM claims",
                (),
            )
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(DecisionStats {
                total: row.get::<i64>(0).map_err(query_err)? as u64,
                approved: row.get::<i64>(1).map_err(query_err)? as u64,
                rejected: row.get::<i64>(2).map_err(query_err)? as u64,
                need_info: row.get::<i64>(3).map_err(query_err)? as u64,
            }),
            None => Ok(DecisionStats::default()),
        }
    }

    async fn recent_claims(&self, limit: usize) -> Result<Vec<ClaimSummary>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT message_id, claim_id, decision, recommendation, customer_name,
                        product_name, timestamp
                 FROM claims ORDER BY timestamp DESC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(query_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            out.push(row_to_summary(&row)?);
        }
        Ok(out)
    }
}
