//! Administrative operations on storage units.
//!
//! A storage unit is a top-level prefix inside the root bucket. Its metadata
//! (logical capacity, quota and creation time) lives in a JSON object under
//! [`METADATA_PREFIX`], outside every unit's own prefix, so that listing a
//! unit only ever sees user data.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::types::UnitName;

use super::config::S3Config;

/// Prefix holding per-unit metadata objects.
pub const METADATA_PREFIX: &str = ".openobject/units";

/// Inode ceiling reported for every unit. Object stores have no inode table,
/// so the object count is measured against this fixed limit.
pub const UNIT_INODE_LIMIT: i64 = 1 << 20;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("storage unit not found: {0}")]
    NotFound(String),

    #[error("corrupt metadata for storage unit {unit}: {source}")]
    Metadata {
        unit: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to build object store client: {0}")]
    Client(String),

    #[error(transparent)]
    Store(#[from] object_store::Error),
}

/// Persisted description of a storage unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitMetadata {
    pub capacity_bytes: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_bytes: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitUsage {
    pub used_bytes: i64,
    pub objects: i64,
}

/// Administrative client for the object store.
#[async_trait]
pub trait BucketAdmin: Send + Sync {
    /// Create a unit with the given logical capacity.
    ///
    /// Returns `false` if the unit already existed, in which case its
    /// metadata is left untouched.
    async fn create_unit(&self, unit: &UnitName, capacity_bytes: i64) -> Result<bool, AdminError>;

    /// Delete a unit and everything stored under it.
    async fn delete_unit(&self, unit: &UnitName) -> Result<(), AdminError>;

    async fn set_quota(&self, unit: &UnitName, quota_bytes: i64) -> Result<(), AdminError>;

    async fn metadata(&self, unit: &UnitName) -> Result<UnitMetadata, AdminError>;

    async fn set_metadata(&self, unit: &UnitName, metadata: &UnitMetadata)
    -> Result<(), AdminError>;

    async fn usage(&self, unit: &UnitName) -> Result<UnitUsage, AdminError>;
}

/// [`BucketAdmin`] over any [`ObjectStore`].
pub struct ObjectStoreAdmin {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreAdmin {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Connect to an S3-compatible endpoint with the given credentials.
    pub fn connect(config: &S3Config) -> Result<Self, AdminError> {
        let store = AmazonS3Builder::new()
            .with_endpoint(&config.endpoint)
            .with_region(&config.region)
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key)
            .with_allow_http(true)
            .with_virtual_hosted_style_request(false)
            .build()
            .map_err(|e| AdminError::Client(e.to_string()))?;
        Ok(Self::new(Arc::new(store)))
    }

    fn metadata_path(unit: &UnitName) -> Path {
        Path::from(format!("{METADATA_PREFIX}/{unit}.json"))
    }

    fn unit_prefix(unit: &UnitName) -> Path {
        Path::from(unit.as_str())
    }

    async fn read_metadata(&self, unit: &UnitName) -> Result<Option<UnitMetadata>, AdminError> {
        let data = match self.store.get(&Self::metadata_path(unit)).await {
            Ok(result) => result.bytes().await?,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|source| AdminError::Metadata {
                unit: unit.to_string(),
                source,
            })
    }
}

#[async_trait]
impl BucketAdmin for ObjectStoreAdmin {
    async fn create_unit(&self, unit: &UnitName, capacity_bytes: i64) -> Result<bool, AdminError> {
        if self.read_metadata(unit).await?.is_some() {
            debug!(unit = %unit, "storage unit already exists");
            return Ok(false);
        }
        let metadata = UnitMetadata {
            capacity_bytes,
            quota_bytes: None,
            created_at: Utc::now(),
        };
        self.set_metadata(unit, &metadata).await?;
        Ok(true)
    }

    async fn delete_unit(&self, unit: &UnitName) -> Result<(), AdminError> {
        if self.read_metadata(unit).await?.is_none() {
            return Err(AdminError::NotFound(unit.to_string()));
        }

        let objects: Vec<_> = self
            .store
            .list(Some(&Self::unit_prefix(unit)))
            .try_collect()
            .await?;
        for object in &objects {
            match self.store.delete(&object.location).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!(unit = %unit, objects = objects.len(), "deleted unit contents");

        self.store.delete(&Self::metadata_path(unit)).await?;
        Ok(())
    }

    async fn set_quota(&self, unit: &UnitName, quota_bytes: i64) -> Result<(), AdminError> {
        let mut metadata = self.metadata(unit).await?;
        metadata.quota_bytes = Some(quota_bytes);
        self.set_metadata(unit, &metadata).await
    }

    async fn metadata(&self, unit: &UnitName) -> Result<UnitMetadata, AdminError> {
        self.read_metadata(unit)
            .await?
            .ok_or_else(|| AdminError::NotFound(unit.to_string()))
    }

    async fn set_metadata(
        &self,
        unit: &UnitName,
        metadata: &UnitMetadata,
    ) -> Result<(), AdminError> {
        let data = serde_json::to_vec(metadata).map_err(|source| AdminError::Metadata {
            unit: unit.to_string(),
            source,
        })?;
        self.store
            .put(&Self::metadata_path(unit), PutPayload::from(data))
            .await?;
        Ok(())
    }

    async fn usage(&self, unit: &UnitName) -> Result<UnitUsage, AdminError> {
        let mut objects = self.store.list(Some(&Self::unit_prefix(unit)));
        let mut usage = UnitUsage::default();
        while let Some(object) = objects.try_next().await? {
            usage.used_bytes = usage.used_bytes.saturating_add(object.size as i64);
            usage.objects += 1;
        }
        Ok(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn unit(name: &str) -> UnitName {
        UnitName::parse(name).unwrap()
    }

    fn admin() -> (ObjectStoreAdmin, Arc<InMemory>) {
        let store = Arc::new(InMemory::new());
        (ObjectStoreAdmin::new(store.clone()), store)
    }

    async fn put(store: &InMemory, path: &str, len: usize) {
        store
            .put(&Path::from(path), PutPayload::from(vec![0u8; len]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_unit_is_idempotent() {
        let (admin, _) = admin();
        let vol = unit("vol-a");

        assert!(admin.create_unit(&vol, 1 << 30).await.unwrap());
        assert!(!admin.create_unit(&vol, 2 << 30).await.unwrap());

        let metadata = admin.metadata(&vol).await.unwrap();
        assert_eq!(metadata.capacity_bytes, 1 << 30);
        assert_eq!(metadata.quota_bytes, None);
    }

    #[tokio::test]
    async fn usage_counts_only_the_unit_prefix() {
        let (admin, store) = admin();
        let vol = unit("vol-a");
        admin.create_unit(&vol, 1 << 30).await.unwrap();

        put(&store, "vol-a/one", 100).await;
        put(&store, "vol-a/dir/two", 50).await;
        put(&store, "vol-ab/other", 1000).await;

        let usage = admin.usage(&vol).await.unwrap();
        assert_eq!(usage.used_bytes, 150);
        assert_eq!(usage.objects, 2);
    }

    #[tokio::test]
    async fn delete_unit_removes_contents_and_metadata() {
        let (admin, store) = admin();
        let vol = unit("vol-a");
        admin.create_unit(&vol, 1 << 30).await.unwrap();
        put(&store, "vol-a/one", 10).await;
        put(&store, "vol-b/keep", 10).await;

        admin.delete_unit(&vol).await.unwrap();

        assert!(matches!(
            admin.metadata(&vol).await,
            Err(AdminError::NotFound(_))
        ));
        assert_eq!(admin.usage(&vol).await.unwrap(), UnitUsage::default());
        assert!(store.head(&Path::from("vol-b/keep")).await.is_ok());
    }

    #[tokio::test]
    async fn delete_missing_unit_reports_not_found() {
        let (admin, _) = admin();
        let err = admin.delete_unit(&unit("ghost")).await.unwrap_err();
        assert!(matches!(err, AdminError::NotFound(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn set_quota_keeps_capacity() {
        let (admin, _) = admin();
        let vol = unit("vol-a");
        admin.create_unit(&vol, 1 << 30).await.unwrap();

        admin.set_quota(&vol, 4 << 30).await.unwrap();

        let metadata = admin.metadata(&vol).await.unwrap();
        assert_eq!(metadata.capacity_bytes, 1 << 30);
        assert_eq!(metadata.quota_bytes, Some(4 << 30));
    }

    #[tokio::test]
    async fn corrupt_metadata_is_reported() {
        let (admin, store) = admin();
        store
            .put(
                &Path::from(format!("{METADATA_PREFIX}/vol-a.json")),
                PutPayload::from_static(b"not json"),
            )
            .await
            .unwrap();

        let err = admin.metadata(&unit("vol-a")).await.unwrap_err();
        assert!(matches!(err, AdminError::Metadata { .. }));
    }
}
