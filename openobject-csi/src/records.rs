//! Persisted volume records.
//!
//! A [`VolumeRecord`] is written when CreateVolume succeeds and read back by
//! every later operation on the same volume ID to recover which backend and
//! storage unit it belongs to. Attributes are fixed at creation; only the
//! capacity changes afterwards (on expansion).

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{PARAM_BACKEND, PARAM_STORAGE_UNIT};

const RECORD_FILE: &str = "record.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub volume_id: String,
    pub capacity_bytes: i64,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl VolumeRecord {
    pub fn new(
        volume_id: impl Into<String>,
        capacity_bytes: i64,
        attributes: HashMap<String, String>,
    ) -> Self {
        Self {
            volume_id: volume_id.into(),
            capacity_bytes,
            attributes,
            created_at: Utc::now(),
        }
    }

    /// Validate that the record is consistent and usable.
    ///
    /// Catches corrupted or hand-edited record files.
    pub fn validate(&self) -> Result<()> {
        validate_volume_id(&self.volume_id)?;
        if self.capacity_bytes < 0 {
            return Err(Error::InvalidRecord(format!(
                "capacity_bytes must not be negative, got {}",
                self.capacity_bytes
            )));
        }
        Ok(())
    }

    /// Backend selector, if recorded.
    pub fn backend(&self) -> Option<&str> {
        self.attributes
            .get(PARAM_BACKEND)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Storage unit backing this volume; defaults to the volume ID.
    pub fn storage_unit(&self) -> &str {
        self.attributes
            .get(PARAM_STORAGE_UNIT)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.volume_id)
    }
}

/// Volume IDs become directory names, so reject anything that could escape
/// the record root.
pub fn validate_volume_id(volume_id: &str) -> Result<()> {
    if volume_id.is_empty()
        || volume_id == "."
        || volume_id == ".."
        || volume_id.contains('/')
        || volume_id.contains('\0')
    {
        return Err(Error::InvalidVolumeId(volume_id.to_string()));
    }
    Ok(())
}

/// Storage for volume records, keyed by volume ID.
#[async_trait]
pub trait VolumeRecords: Send + Sync {
    /// Insert `record` unless one already exists for its ID.
    ///
    /// Returns the stored record, which is the existing one on a repeat call.
    async fn create(&self, record: VolumeRecord) -> Result<VolumeRecord>;

    async fn get(&self, volume_id: &str) -> Result<Option<VolumeRecord>>;

    /// Change the recorded capacity. Fails if the record does not exist.
    async fn update_capacity(&self, volume_id: &str, capacity_bytes: i64)
    -> Result<VolumeRecord>;

    /// Remove a record. Missing records are not an error.
    async fn delete(&self, volume_id: &str) -> Result<()>;

    /// All records, ordered by volume ID.
    async fn list(&self) -> Result<Vec<VolumeRecord>>;

    /// Like [`get`](Self::get), but a missing record is an error.
    async fn lookup(&self, volume_id: &str) -> Result<VolumeRecord> {
        self.get(volume_id)
            .await?
            .ok_or_else(|| Error::RecordNotFound(volume_id.to_string()))
    }
}

/// Records stored as JSON files under `<root>/<volume_id>/record.json`.
pub struct DirRecordStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl DirRecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, volume_id: &str) -> PathBuf {
        self.root.join(volume_id).join(RECORD_FILE)
    }

    async fn read(&self, volume_id: &str) -> Result<Option<VolumeRecord>> {
        let data = match tokio::fs::read_to_string(self.record_path(volume_id)).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: VolumeRecord = serde_json::from_str(&data)?;
        record.validate()?;
        Ok(Some(record))
    }

    async fn write(&self, record: &VolumeRecord) -> Result<()> {
        let dir = self.root.join(&record.volume_id);
        tokio::fs::create_dir_all(&dir).await?;

        let data = serde_json::to_vec_pretty(record)?;
        let tmp = dir.join(format!("{RECORD_FILE}.tmp"));
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, dir.join(RECORD_FILE)).await?;
        Ok(())
    }
}

#[async_trait]
impl VolumeRecords for DirRecordStore {
    async fn create(&self, record: VolumeRecord) -> Result<VolumeRecord> {
        record.validate()?;
        let _guard = self.write_lock.lock().await;

        if let Some(existing) = self.read(&record.volume_id).await? {
            debug!(volume_id = %record.volume_id, "record already exists");
            return Ok(existing);
        }
        self.write(&record).await?;
        Ok(record)
    }

    async fn get(&self, volume_id: &str) -> Result<Option<VolumeRecord>> {
        validate_volume_id(volume_id)?;
        self.read(volume_id).await
    }

    async fn update_capacity(
        &self,
        volume_id: &str,
        capacity_bytes: i64,
    ) -> Result<VolumeRecord> {
        validate_volume_id(volume_id)?;
        let _guard = self.write_lock.lock().await;

        let mut record = self
            .read(volume_id)
            .await?
            .ok_or_else(|| Error::RecordNotFound(volume_id.to_string()))?;
        record.capacity_bytes = capacity_bytes;
        self.write(&record).await?;
        Ok(record)
    }

    async fn delete(&self, volume_id: &str) -> Result<()> {
        validate_volume_id(volume_id)?;
        let _guard = self.write_lock.lock().await;

        match tokio::fs::remove_dir_all(self.root.join(volume_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<VolumeRecord>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let volume_id = entry.file_name().to_string_lossy().to_string();
            match self.read(&volume_id).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => debug!(volume_id, error = %e, "skipping unreadable record"),
            }
        }
        records.sort_by(|a, b| a.volume_id.cmp(&b.volume_id));
        Ok(records)
    }
}

/// In-process record store.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<BTreeMap<String, VolumeRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VolumeRecords for MemoryRecordStore {
    async fn create(&self, record: VolumeRecord) -> Result<VolumeRecord> {
        record.validate()?;
        let mut records = self.records.write().await;
        Ok(records
            .entry(record.volume_id.clone())
            .or_insert(record)
            .clone())
    }

    async fn get(&self, volume_id: &str) -> Result<Option<VolumeRecord>> {
        Ok(self.records.read().await.get(volume_id).cloned())
    }

    async fn update_capacity(
        &self,
        volume_id: &str,
        capacity_bytes: i64,
    ) -> Result<VolumeRecord> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(volume_id)
            .ok_or_else(|| Error::RecordNotFound(volume_id.to_string()))?;
        record.capacity_bytes = capacity_bytes;
        Ok(record.clone())
    }

    async fn delete(&self, volume_id: &str) -> Result<()> {
        self.records.write().await.remove(volume_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<VolumeRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}
