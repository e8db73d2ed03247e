//! Local draft cache for ungraded practice input
//!
//! Write-through on every edit, restored verbatim on the next visit on the
//! same device. Drafts are never sent to the completion store and the core
//! never removes them.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::course::ContentUnitKey;
use crate::error::ProgressError;

/// Synchronous string-keyed storage scoped to one device
pub trait LocalStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, ProgressError>;
    fn set(&self, key: &str, value: &str) -> Result<(), ProgressError>;
}

/// Process-local storage
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, ProgressError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| ProgressError::Internal(format!("Lock poisoned: {}", e)))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ProgressError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| ProgressError::Internal(format!("Lock poisoned: {}", e)))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Storage persisted in a sled tree
pub struct SledStorage {
    _db: sled::Db,
    drafts: sled::Tree,
}

impl SledStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ProgressError> {
        let db = sled::open(path.as_ref())
            .map_err(|e| ProgressError::Internal(format!("Failed to open draft cache: {}", e)))?;
        let drafts = db
            .open_tree("drafts")
            .map_err(|e| ProgressError::Internal(format!("Failed to open drafts tree: {}", e)))?;

        info!(path = %path.as_ref().display(), "Draft cache opened");
        Ok(Self { _db: db, drafts })
    }
}

impl LocalStorage for SledStorage {
    fn get(&self, key: &str) -> Result<Option<String>, ProgressError> {
        let value = self
            .drafts
            .get(key.as_bytes())
            .map_err(|e| ProgressError::Internal(format!("Draft read failed: {}", e)))?;

        value
            .map(|v| {
                String::from_utf8(v.to_vec())
                    .map_err(|e| ProgressError::Internal(format!("Draft is not UTF-8: {}", e)))
            })
            .transpose()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ProgressError> {
        self.drafts
            .insert(key.as_bytes(), value.as_bytes())
            .map_err(|e| ProgressError::Internal(format!("Draft write failed: {}", e)))?;
        self.drafts
            .flush()
            .map_err(|e| ProgressError::Internal(format!("Draft flush failed: {}", e)))?;
        Ok(())
    }
}

/// Per-unit, per-field draft slots
pub struct DraftCache {
    storage: Box<dyn LocalStorage>,
}

impl DraftCache {
    pub fn new(storage: Box<dyn LocalStorage>) -> Self {
        Self { storage }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStorage::new()))
    }

    /// Storage key for a slot: `draft:{unit length}:{unit}:{field}`.
    ///
    /// Unit keys and field ids may both contain `:`, so the unit key is
    /// length-prefixed to keep distinct slots from sharing a key.
    pub fn slot_key(unit_key: &ContentUnitKey, field_id: &str) -> String {
        let unit = unit_key.as_str();
        format!("draft:{}:{}:{}", unit.len(), unit, field_id)
    }

    pub fn save(&self, unit_key: &ContentUnitKey, field_id: &str, value: &str) -> Result<(), ProgressError> {
        let key = Self::slot_key(unit_key, field_id);
        self.storage.set(&key, value).inspect_err(|e| {
            warn!(unit_key = %unit_key, field_id = %field_id, error = %e, "Draft save failed");
        })?;
        debug!(unit_key = %unit_key, field_id = %field_id, len = value.len(), "Draft saved");
        Ok(())
    }

    /// Saved value, or `None` when nothing was ever saved on this device
    pub fn restore(&self, unit_key: &ContentUnitKey, field_id: &str) -> Result<Option<String>, ProgressError> {
        self.storage.get(&Self::slot_key(unit_key, field_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn unit() -> ContentUnitKey {
        ContentUnitKey::new("privacy:week2:redaction").unwrap()
    }

    #[test]
    fn test_round_trip_and_empty() {
        let cache = DraftCache::in_memory();
        cache.save(&unit(), "demo", "hello").unwrap();
        assert_eq!(cache.restore(&unit(), "demo").unwrap().as_deref(), Some("hello"));
        assert_eq!(cache.restore(&unit(), "other").unwrap(), None);
    }

    #[test]
    fn test_last_write_wins() {
        let cache = DraftCache::in_memory();
        cache.save(&unit(), "demo", "h").unwrap();
        cache.save(&unit(), "demo", "he").unwrap();
        cache.save(&unit(), "demo", "").unwrap();
        assert_eq!(cache.restore(&unit(), "demo").unwrap().as_deref(), Some(""));
    }

    #[test]
    fn test_slots_are_per_unit() {
        let cache = DraftCache::in_memory();
        let other = ContentUnitKey::new("privacy:week2:other").unwrap();
        cache.save(&unit(), "demo", "mine").unwrap();
        assert_eq!(cache.restore(&other, "demo").unwrap(), None);
        assert_eq!(DraftCache::slot_key(&unit(), "demo"), "draft:23:privacy:week2:redaction:demo");
    }

    #[test]
    fn test_colons_do_not_merge_slots() {
        let cache = DraftCache::in_memory();
        let short = ContentUnitKey::new("ethics:week1").unwrap();
        let long = ContentUnitKey::new("ethics:week1:privacy").unwrap();

        cache.save(&short, "privacy:demo", "secret").unwrap();
        assert_eq!(cache.restore(&long, "demo").unwrap(), None);
        assert_eq!(cache.restore(&short, "privacy:demo").unwrap().as_deref(), Some("secret"));
        assert_ne!(
            DraftCache::slot_key(&short, "privacy:demo"),
            DraftCache::slot_key(&long, "demo")
        );
    }

    #[test]
    fn test_sled_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("drafts.sled");

        {
            let cache = DraftCache::new(Box::new(SledStorage::open(&path).unwrap()));
            cache.save(&unit(), "demo", "My SSN is [REDACTED]").unwrap();
        }

        let cache = DraftCache::new(Box::new(SledStorage::open(&path).unwrap()));
        assert_eq!(
            cache.restore(&unit(), "demo").unwrap().as_deref(),
            Some("My SSN is [REDACTED]")
        );
    }
}
