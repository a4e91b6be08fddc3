//! Tracking store: persisted source-id to destination-id correspondence.
//!
//! A record reached through multiple relation paths (or re-run in a later
//! batch) must not be migrated twice. The executor consults the tracking
//! store before resolving any record and writes to it after every
//! successful create. Entries are append-only, keyed by
//! `(source_model, source_id)`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::core::value::RecordId;
use crate::error::{MigrateError, Result};

/// Persistence backend for the migrated-record correspondence.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Destination id of an already-migrated source record, if any.
    async fn lookup(&self, source_model: &str, source_id: RecordId) -> Result<Option<RecordId>>;

    /// Record a completed migration of one source record.
    async fn record(
        &self,
        source_model: &str,
        source_id: RecordId,
        destination_id: RecordId,
    ) -> Result<()>;

    /// Backend type name for logging/debugging.
    fn backend_type(&self) -> &'static str;
}

/// One tracked correspondence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedRecord {
    /// Destination record id.
    pub destination_id: RecordId,

    /// When the record was migrated.
    pub migrated_at: DateTime<Utc>,
}

type TrackingKey = (String, RecordId);

/// JSON-file tracking store.
///
/// The whole correspondence is loaded at open and rewritten (temp file,
/// then rename) after every recorded migration; migration batches are
/// small enough that this stays cheap, and the rename keeps the file
/// valid after any interruption.
#[derive(Debug)]
pub struct FileTrackingStore {
    path: PathBuf,
    entries: Mutex<HashMap<TrackingKey, TrackedRecord>>,
}

/// Serialized shape: model -> source id (as string key) -> entry.
type FileShape = HashMap<String, HashMap<String, TrackedRecord>>;

impl FileTrackingStore {
    /// Open a tracking store, loading existing entries if the file exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut entries = HashMap::new();

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let shape: FileShape = serde_json::from_str(&content).map_err(|e| {
                MigrateError::config(format!("tracking file {}: {}", path.display(), e))
            })?;
            for (model, records) in shape {
                for (id, entry) in records {
                    let id: RecordId = id.parse().map_err(|_| {
                        MigrateError::config(format!(
                            "tracking file {}: invalid record id '{}' under '{}'",
                            path.display(),
                            id,
                            model
                        ))
                    })?;
                    entries.insert((model.clone(), id), entry);
                }
            }
        }

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Number of tracked records.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the store has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn flush(&self, entries: &HashMap<TrackingKey, TrackedRecord>) -> Result<()> {
        let mut shape: FileShape = HashMap::new();
        for ((model, id), entry) in entries {
            shape
                .entry(model.clone())
                .or_default()
                .insert(id.to_string(), entry.clone());
        }
        let json = serde_json::to_string_pretty(&shape)?;

        // temp file + rename, so an interrupted write never leaves a
        // half-written tracking file behind
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl TrackingStore for FileTrackingStore {
    async fn lookup(&self, source_model: &str, source_id: RecordId) -> Result<Option<RecordId>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .get(&(source_model.to_string(), source_id))
            .map(|e| e.destination_id))
    }

    async fn record(
        &self,
        source_model: &str,
        source_id: RecordId,
        destination_id: RecordId,
    ) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            (source_model.to_string(), source_id),
            TrackedRecord {
                destination_id,
                migrated_at: Utc::now(),
            },
        );
        self.flush(&entries)
    }

    fn backend_type(&self) -> &'static str {
        "file"
    }
}

/// In-memory tracking store, for tests and nested one-process runs.
#[derive(Default)]
pub struct MemoryTrackingStore {
    entries: Mutex<HashMap<TrackingKey, RecordId>>,
}

impl MemoryTrackingStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrackingStore for MemoryTrackingStore {
    async fn lookup(&self, source_model: &str, source_id: RecordId) -> Result<Option<RecordId>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(&(source_model.to_string(), source_id)).copied())
    }

    async fn record(
        &self,
        source_model: &str,
        source_id: RecordId,
        destination_id: RecordId,
    ) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert((source_model.to_string(), source_id), destination_id);
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

/// Tracking disabled: lookups always miss, writes are dropped.
///
/// Warns once so an operator notices re-runs will not short-circuit.
pub struct NoopTrackingStore {
    warned: std::sync::atomic::AtomicBool,
}

impl NoopTrackingStore {
    /// New no-op store.
    pub fn new() -> Self {
        Self {
            warned: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn warn_once(&self) {
        if !self
            .warned
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            warn!(
                "Tracking is disabled: already-migrated records will be re-resolved \
                 through search keys only."
            );
        }
    }
}

impl Default for NoopTrackingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrackingStore for NoopTrackingStore {
    async fn lookup(&self, _source_model: &str, _source_id: RecordId) -> Result<Option<RecordId>> {
        self.warn_once();
        Ok(None)
    }

    async fn record(
        &self,
        _source_model: &str,
        _source_id: RecordId,
        _destination_id: RecordId,
    ) -> Result<()> {
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryTrackingStore::new();
        assert_eq!(store.lookup("res.partner", 42).await.unwrap(), None);

        store.record("res.partner", 42, 7).await.unwrap();
        assert_eq!(store.lookup("res.partner", 42).await.unwrap(), Some(7));
        assert_eq!(store.lookup("res.country", 42).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracking.json");

        let store = FileTrackingStore::open(&path).unwrap();
        assert!(store.is_empty());
        store.record("res.partner", 42, 7).await.unwrap();
        store.record("res.partner.category", 9, 3).await.unwrap();
        assert_eq!(store.len(), 2);

        let reopened = FileTrackingStore::open(&path).unwrap();
        assert_eq!(reopened.lookup("res.partner", 42).await.unwrap(), Some(7));
        assert_eq!(
            reopened.lookup("res.partner.category", 9).await.unwrap(),
            Some(3)
        );
    }

    #[tokio::test]
    async fn test_file_store_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracking.json");

        let store = FileTrackingStore::open(&path).unwrap();
        store.record("res.partner", 42, 7).await.unwrap();
        store.record("res.partner", 43, 8).await.unwrap();

        assert!(path.exists());
        assert!(!dir.path().join("tracking.json.tmp").exists());

        let reopened = FileTrackingStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
    }

    #[tokio::test]
    async fn test_file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracking.json");
        std::fs::write(&path, "not json").unwrap();

        let err = FileTrackingStore::open(&path).unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
    }

    #[tokio::test]
    async fn test_noop_store_never_hits() {
        let store = NoopTrackingStore::new();
        store.record("res.partner", 42, 7).await.unwrap();
        assert_eq!(store.lookup("res.partner", 42).await.unwrap(), None);
        assert_eq!(store.backend_type(), "noop");
    }
}
