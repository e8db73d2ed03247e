//! Completion store adapter
//!
//! One logical record per (learner, content unit). Every write is an upsert
//! on that pair, `completed` is monotone (a write never turns it back to
//! false) and anonymous writes are refused before the store is touched.
//! Remote failures are reported to the caller and never retried here.
//!
//! ## Backends
//!
//! - [`MemoryCompletionStore`] - in-process map, for tests and demos
//! - [`crate::db::SqliteCompletionStore`] - local SQLite table
//! - [`crate::remote::HttpCompletionStore`] - hosted REST table

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::course::ContentUnitKey;
use crate::error::ProgressError;
use crate::identity::{LearnerId, LearnerIdentity};

/// Completion of one unit by one learner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub learner_id: LearnerId,
    pub unit_key: ContentUnitKey,
    pub completed: bool,
    pub completed_at: DateTime<Utc>,
}

impl CompletionRecord {
    pub fn completed_now(learner_id: LearnerId, unit_key: ContentUnitKey) -> Self {
        Self {
            learner_id,
            unit_key,
            completed: true,
            completed_at: Utc::now(),
        }
    }

    /// Upsert merge: the incoming row overwrites in place, except that a
    /// completed flag already set stays set.
    pub fn merged_over(mut self, existing: &CompletionRecord) -> Self {
        self.completed = self.completed || existing.completed;
        self
    }
}

/// Durable record store keyed on `(learner_id, unit_key)`
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the record for a pair, `None` if never written
    async fn select_one(
        &self,
        learner_id: &LearnerId,
        unit_key: &ContentUnitKey,
    ) -> Result<Option<CompletionRecord>, ProgressError>;

    /// Insert or overwrite the record for its pair, returning the stored row
    async fn upsert(&self, record: &CompletionRecord) -> Result<CompletionRecord, ProgressError>;

    /// Fetch records for several units at once (course summaries)
    async fn select_many(
        &self,
        learner_id: &LearnerId,
        unit_keys: &[ContentUnitKey],
    ) -> Result<Vec<CompletionRecord>, ProgressError>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryCompletionStore {
    records: DashMap<(LearnerId, ContentUnitKey), CompletionRecord>,
}

impl MemoryCompletionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RemoteStore for MemoryCompletionStore {
    async fn select_one(
        &self,
        learner_id: &LearnerId,
        unit_key: &ContentUnitKey,
    ) -> Result<Option<CompletionRecord>, ProgressError> {
        Ok(self
            .records
            .get(&(learner_id.clone(), unit_key.clone()))
            .map(|r| r.value().clone()))
    }

    async fn upsert(&self, record: &CompletionRecord) -> Result<CompletionRecord, ProgressError> {
        let key = (record.learner_id.clone(), record.unit_key.clone());
        let mut entry = self.records.entry(key).or_insert_with(|| record.clone());
        let merged = record.clone().merged_over(entry.value());
        *entry.value_mut() = merged.clone();
        Ok(merged)
    }

    async fn select_many(
        &self,
        learner_id: &LearnerId,
        unit_keys: &[ContentUnitKey],
    ) -> Result<Vec<CompletionRecord>, ProgressError> {
        Ok(unit_keys
            .iter()
            .filter_map(|k| {
                self.records
                    .get(&(learner_id.clone(), k.clone()))
                    .map(|r| r.value().clone())
            })
            .collect())
    }
}

/// Run a remote call under the network timeout, mapping expiry to `Timeout`
pub(crate) async fn with_timeout<T, F>(timeout: Duration, what: &str, fut: F) -> Result<T, ProgressError>
where
    F: Future<Output = Result<T, ProgressError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProgressError::Timeout(format!(
            "{} exceeded {}ms",
            what,
            timeout.as_millis()
        ))),
    }
}

/// Adapter the navigator talks to
pub struct CompletionStore {
    remote: Arc<dyn RemoteStore>,
    timeout: Duration,
}

impl CompletionStore {
    pub fn new(remote: Arc<dyn RemoteStore>, timeout: Duration) -> Self {
        Self { remote, timeout }
    }

    /// Read the record for a pair. `Ok(None)` means not completed.
    pub async fn read(
        &self,
        learner_id: &LearnerId,
        unit_key: &ContentUnitKey,
    ) -> Result<Option<CompletionRecord>, ProgressError> {
        let result = with_timeout(
            self.timeout,
            "completion read",
            self.remote.select_one(learner_id, unit_key),
        )
        .await;

        match &result {
            Ok(Some(_)) => debug!(learner_id = %learner_id, unit_key = %unit_key, "Completion found"),
            Ok(None) => debug!(learner_id = %learner_id, unit_key = %unit_key, "No completion record"),
            Err(e) => warn!(learner_id = %learner_id, unit_key = %unit_key, error = %e, "Completion read failed"),
        }
        result
    }

    /// Whether the learner has completed the unit
    pub async fn is_completed(
        &self,
        learner_id: &LearnerId,
        unit_key: &ContentUnitKey,
    ) -> Result<bool, ProgressError> {
        Ok(self
            .read(learner_id, unit_key)
            .await?
            .map(|r| r.completed)
            .unwrap_or(false))
    }

    /// Read every record the learner has among `unit_keys`
    pub async fn read_many(
        &self,
        learner_id: &LearnerId,
        unit_keys: &[ContentUnitKey],
    ) -> Result<Vec<CompletionRecord>, ProgressError> {
        if unit_keys.is_empty() {
            return Ok(vec![]);
        }
        with_timeout(
            self.timeout,
            "completion list",
            self.remote.select_many(learner_id, unit_keys),
        )
        .await
        .inspect_err(|e| warn!(learner_id = %learner_id, error = %e, "Completion list failed"))
    }

    /// Mark the unit completed for the identified learner.
    ///
    /// Anonymous sessions get `Err(Unauthenticated)` and the store is not
    /// called. Repeating the write for the same pair is harmless.
    pub async fn write(
        &self,
        identity: &LearnerIdentity,
        unit_key: &ContentUnitKey,
    ) -> Result<CompletionRecord, ProgressError> {
        let LearnerIdentity::Identified(learner_id) = identity else {
            debug!(unit_key = %unit_key, "Refusing anonymous completion");
            return Err(ProgressError::Unauthenticated);
        };

        let record = CompletionRecord::completed_now(learner_id.clone(), unit_key.clone());
        let stored = with_timeout(self.timeout, "completion write", self.remote.upsert(&record))
            .await
            .inspect_err(|e| warn!(learner_id = %learner_id, unit_key = %unit_key, error = %e, "Completion write failed"))?;

        info!(learner_id = %learner_id, unit_key = %unit_key, "Completion recorded");
        Ok(stored)
    }
}
