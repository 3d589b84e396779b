//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            claim_id TEXT PRIMARY KEY,
            record TEXT NOT NULL,
            next_stage TEXT,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS dispatches (
            dispatch_key TEXT PRIMARY KEY,
            claim_id TEXT NOT NULL,
            message_id TEXT NOT NULL DEFAULT '',
            provider TEXT NOT NULL,
            recipient TEXT NOT NULL DEFAULT '',
            subject TEXT NOT NULL DEFAULT '',
            payload_hash TEXT NOT NULL,
            status TEXT NOT NULL,
            provider_message_id TEXT,
            error TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_dispatches_claim ON dispatches(claim_id);

        CREATE TABLE IF NOT EXISTS claims (
            message_id TEXT PRIMARY KEY,
            claim_id TEXT NOT NULL,
            decision TEXT,
            recommendation TEXT,
            confidence REAL,
            customer_name TEXT,
            customer_email TEXT,
            product_name TEXT,
            product_id TEXT,
            issue_description TEXT,
            warranty_valid INTEGER,
            policy_id TEXT,
            policy_version TEXT,
            reviewer TEXT,
            notes TEXT,
            timestamp TEXT NOT NULL,
            full_record TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_claims_decision ON claims(decision);
    "#,
}];

/// Apply all migrations newer than the recorded schema version.
pub async fn run(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations: {e}")))?;

    let current = current_version(conn).await?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        conn.execute_batch(migration.sql)
            .await
            .map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration {} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
        conn.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            libsql::params![migration.version, migration.name],
        )
        .await
        .map_err(|e| {
            DatabaseError::Migration(format!(
                "Failed to record migration {}: {e}",
                migration.version
            ))
        })?;
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applied migration"
        );
    }

    Ok(())
}

async fn current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read version: {e}")))?;
    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read version row: {e}")))?;
    match row {
        Some(row) => row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Migration(format!("Bad version value: {e}"))),
        None => Ok(0),
    }
}
