use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::BackupConfig;
use crate::error::AppError;
use crate::models::document::DocumentFields;
use crate::models::slug::DocumentId;

/// Version tag written into every backup record.
pub const BACKUP_SCHEMA_VERSION: u32 = 1;

/// Slot-addressed string storage backing the local backup.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, AppError>;
    fn set(&self, key: &str, value: &str) -> Result<(), AppError>;
    fn remove(&self, key: &str) -> Result<(), AppError>;
}

/// Process-local store, lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, AppError> {
        self.entries
            .lock()
            .map_err(|e| AppError::Internal(format!("Key-value store poisoned: {e}")))
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), AppError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// One JSON file per slot inside a directory. Survives restarts.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    /// Use `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, AppError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            AppError::Internal(format!("Failed to create {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Internal(format!("Failed to read slot '{key}': {e}"))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|e| AppError::Internal(format!("Failed to write slot '{key}': {e}")))
    }

    fn remove(&self, key: &str) -> Result<(), AppError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Internal(format!("Failed to remove slot '{key}': {e}"))),
        }
    }
}

/// The locally cached shadow of the Content Buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    #[serde(flatten)]
    pub fields: DocumentFields,
    /// Set once the document has been saved remotely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<DocumentId>,
    pub last_saved_at: DateTime<Utc>,
    pub schema_version: u32,
}

/// What a recovery prompt shows about a pending backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSummary {
    pub has_title: bool,
    pub has_description: bool,
    pub has_content: bool,
    pub last_saved_at: DateTime<Utc>,
}

impl From<&BackupRecord> for BackupSummary {
    fn from(record: &BackupRecord) -> Self {
        Self {
            has_title: !record.fields.title.trim().is_empty(),
            has_description: !record.fields.description.trim().is_empty(),
            has_content: record.fields.content_blocks.iter().any(|b| !b.is_trivial()),
            last_saved_at: record.last_saved_at,
        }
    }
}

/// Single-slot backup of the document being edited.
///
/// Never fails from the caller's point of view: write errors are logged,
/// and unreadable, foreign-version or stale records read as absent.
pub struct LocalBackupStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    slot: String,
    staleness: Duration,
}

impl LocalBackupStore {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, config: &BackupConfig) -> Self {
        Self {
            store,
            clock,
            slot: config.slot.clone(),
            staleness: Duration::hours(config.staleness_hours),
        }
    }

    /// Build a record for `fields`, stamped with the current time.
    pub fn snapshot(&self, fields: &DocumentFields, document_id: Option<&DocumentId>) -> BackupRecord {
        BackupRecord {
            fields: fields.clone(),
            document_id: document_id.cloned(),
            last_saved_at: self.clock.now(),
            schema_version: BACKUP_SCHEMA_VERSION,
        }
    }

    /// Overwrite the slot with `record`.
    pub fn save(&self, record: &BackupRecord) {
        let raw = match serde_json::to_string(record) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize backup record");
                return;
            }
        };

        if let Err(e) = self.store.set(&self.slot, &raw) {
            tracing::warn!(slot = %self.slot, error = %e, "Failed to write backup record");
        }
    }

    /// Snapshot `fields` and write it.
    pub fn save_fields(&self, fields: &DocumentFields, document_id: Option<&DocumentId>) {
        self.save(&self.snapshot(fields, document_id));
    }

    /// The stored record, if there is a usable one.
    pub fn load(&self) -> Option<BackupRecord> {
        let raw = match self.store.get(&self.slot) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(slot = %self.slot, error = %e, "Failed to read backup record");
                return None;
            }
        };

        let record: BackupRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(slot = %self.slot, error = %e, "Discarding corrupt backup record");
                self.clear();
                return None;
            }
        };

        if record.schema_version != BACKUP_SCHEMA_VERSION {
            tracing::warn!(
                slot = %self.slot,
                schema_version = record.schema_version,
                "Discarding backup record with unknown schema version"
            );
            self.clear();
            return None;
        }

        if self.clock.now() - record.last_saved_at > self.staleness {
            tracing::debug!(slot = %self.slot, last_saved_at = %record.last_saved_at, "Discarding stale backup record");
            self.clear();
            return None;
        }

        Some(record)
    }

    pub fn clear(&self) {
        if let Err(e) = self.store.remove(&self.slot) {
            tracing::warn!(slot = %self.slot, error = %e, "Failed to clear backup record");
        }
    }

    pub fn describe(&self) -> Option<BackupSummary> {
        self.load().as_ref().map(BackupSummary::from)
    }

    /// Attach the id a save assigned to the pending record.
    ///
    /// A record that already carries an id, or no record at all, is left
    /// alone. The record keeps its original timestamp.
    pub fn remember_id(&self, id: &DocumentId) {
        let Some(mut record) = self.load() else {
            return;
        };
        if record.document_id.is_some() {
            return;
        }
        tracing::debug!(slot = %self.slot, id = %id, "Recording assigned id in backup");
        record.document_id = Some(id.clone());
        self.save(&record);
    }
}
