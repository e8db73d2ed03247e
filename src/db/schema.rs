//! Completion table schema and migrations
//!
//! `MIGRATIONS[n]` takes the database from version `n` to `n + 1`. A fresh
//! database starts at version 0 and runs every step; an existing one runs
//! only the steps it is missing, each in its own transaction.

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::ProgressError;

/// Ordered schema steps
const MIGRATIONS: &[&str] = &[
    // v1: one row per (app, learner, unit); the unique constraint is the upsert target
    r#"
    CREATE TABLE completions (
        id TEXT PRIMARY KEY NOT NULL,
        app_id TEXT NOT NULL,
        learner_id TEXT NOT NULL,
        unit_key TEXT NOT NULL,
        completed INTEGER NOT NULL DEFAULT 0,
        completed_at TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now')),
        UNIQUE (app_id, learner_id, unit_key)
    );

    CREATE INDEX idx_completions_learner ON completions(app_id, learner_id);
    "#,
];

/// Version a fully migrated database reports
pub const SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

/// Bring the database up to `SCHEMA_VERSION`.
///
/// Refuses databases written by a newer build rather than guessing at
/// their layout.
pub fn init_schema(conn: &mut Connection) -> Result<(), ProgressError> {
    let current = schema_version(conn)?;

    if current > SCHEMA_VERSION {
        return Err(ProgressError::Config(format!(
            "Database schema v{} is newer than supported v{}",
            current, SCHEMA_VERSION
        )));
    }
    if current == SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current);
        return Ok(());
    }

    for (from, step) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        let to = from as i32 + 1;
        info!("Migrating completion schema v{} -> v{}", from, to);

        let tx = conn.transaction().map_err(migration_err)?;
        tx.execute_batch(step).map_err(migration_err)?;
        tx.execute("DELETE FROM schema_version", []).map_err(migration_err)?;
        tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [to])
            .map_err(migration_err)?;
        tx.commit().map_err(migration_err)?;
    }

    Ok(())
}

/// Current schema version (0 if not initialized)
fn schema_version(conn: &Connection) -> Result<i32, ProgressError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(migration_err)?;

    let version = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()
        .map_err(migration_err)?;

    Ok(version.unwrap_or(0))
}

fn migration_err(e: rusqlite::Error) -> ProgressError {
    ProgressError::Internal(format!("Schema migration failed: {}", e))
}
