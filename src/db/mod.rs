//! SQLite completion store
//!
//! Local backend for the completion table, used when no hosted store is
//! configured. All rows are scoped by app_id.
//!
//! ## Tables
//!
//! - `completions` - one row per (app, learner, unit), unique on that triple
//! - `schema_version` - migration bookkeeping

pub mod scope;
pub mod schema;

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use crate::completion::{CompletionRecord, RemoteStore};
use crate::course::ContentUnitKey;
use crate::error::ProgressError;
use crate::identity::LearnerId;

pub use scope::StoreScope;

/// SQLite-backed completion store
pub struct SqliteCompletionStore {
    conn: Mutex<Connection>,
    scope: StoreScope,
}

impl SqliteCompletionStore {
    /// Open or create the completion database
    pub fn open(db_path: &Path, scope: StoreScope) -> Result<Self, ProgressError> {
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(db_path)
            .map_err(|e| ProgressError::Internal(format!("Failed to open SQLite: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| ProgressError::Internal(format!("Failed to set PRAGMA: {}", e)))?;

        Self::from_connection(conn, scope)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory(scope: StoreScope) -> Result<Self, ProgressError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory().map_err(|e| {
            ProgressError::Internal(format!("Failed to open in-memory SQLite: {}", e))
        })?;

        Self::from_connection(conn, scope)
    }

    fn from_connection(mut conn: Connection, scope: StoreScope) -> Result<Self, ProgressError> {
        schema::init_schema(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            scope,
        })
    }

    pub fn scope(&self) -> &StoreScope {
        &self.scope
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T, ProgressError>
    where
        F: FnOnce(&Connection) -> Result<T, ProgressError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ProgressError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Count completion rows in this app scope
    pub fn count(&self) -> Result<i64, ProgressError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM completions WHERE app_id = ?1",
                params![self.scope.app_id()],
                |row| row.get(0),
            )
            .map_err(query_err)
        })
    }
}

fn query_err(e: rusqlite::Error) -> ProgressError {
    ProgressError::RemoteUnavailable(format!("Query failed: {}", e))
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, bool, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get::<_, i64>(2)? != 0, row.get(3)?))
}

fn into_record(
    (learner_id, unit_key, completed, completed_at): (String, String, bool, String),
) -> Result<CompletionRecord, ProgressError> {
    let completed_at = DateTime::parse_from_rfc3339(&completed_at)
        .map_err(|e| ProgressError::Internal(format!("Bad completed_at '{}': {}", completed_at, e)))?
        .with_timezone(&Utc);
    Ok(CompletionRecord {
        learner_id: LearnerId::new(learner_id),
        unit_key: ContentUnitKey::new(unit_key)?,
        completed,
        completed_at,
    })
}

#[async_trait]
impl RemoteStore for SqliteCompletionStore {
    async fn select_one(
        &self,
        learner_id: &LearnerId,
        unit_key: &ContentUnitKey,
    ) -> Result<Option<CompletionRecord>, ProgressError> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                "SELECT learner_id, unit_key, completed, completed_at FROM completions
                 WHERE app_id = ?1 AND learner_id = ?2 AND unit_key = ?3",
                params![self.scope.app_id(), learner_id.as_str(), unit_key.as_str()],
                row_to_record,
            )
            .optional()
            .map_err(query_err)
        })?;

        row.map(into_record).transpose()
    }

    async fn upsert(&self, record: &CompletionRecord) -> Result<CompletionRecord, ProgressError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO completions (id, app_id, learner_id, unit_key, completed, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (app_id, learner_id, unit_key) DO UPDATE SET
                    completed = MAX(completions.completed, excluded.completed),
                    completed_at = excluded.completed_at,
                    updated_at = datetime('now')",
                params![
                    Uuid::new_v4().to_string(),
                    self.scope.app_id(),
                    record.learner_id.as_str(),
                    record.unit_key.as_str(),
                    record.completed as i64,
                    record.completed_at.to_rfc3339(),
                ],
            )
            .map_err(|e| ProgressError::RemoteUnavailable(format!("Upsert failed: {}", e)))?;
            Ok(())
        })?;

        self.select_one(&record.learner_id, &record.unit_key)
            .await?
            .ok_or_else(|| ProgressError::Internal("Failed to retrieve upserted completion".into()))
    }

    async fn select_many(
        &self,
        learner_id: &LearnerId,
        unit_keys: &[ContentUnitKey],
    ) -> Result<Vec<CompletionRecord>, ProgressError> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT learner_id, unit_key, completed, completed_at FROM completions
                     WHERE app_id = ?1 AND learner_id = ?2
                     ORDER BY completed_at",
                )
                .map_err(query_err)?;
            let rows = stmt
                .query_map(params![self.scope.app_id(), learner_id.as_str()], row_to_record)
                .map_err(query_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(query_err)?;
            Ok(rows)
        })?;

        rows.into_iter()
            .filter(|(_, unit, _, _)| unit_keys.iter().any(|k| k.as_str() == unit))
            .map(into_record)
            .collect()
    }
}
