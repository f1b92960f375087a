//! Storage backends.
//!
//! A [`Backend`] is built per RPC from the request's credentials through the
//! [`BackendRegistry`], used for that one call, and dropped.

mod registry;
pub mod s3;

pub use registry::{BackendFactory, BackendRegistry};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use openobject_connector::Bridge;

use crate::driver::FeatureGates;
use crate::error::{Error, Result};
use crate::records::VolumeRecord;

/// Credentials passed with a request, keyed by secret name.
pub type Secrets = HashMap<String, String>;

/// Process-wide inputs every backend is built with.
#[derive(Clone)]
pub struct BackendContext {
    pub bridge: Arc<dyn Bridge>,
    pub features: FeatureGates,
    /// Where the host filesystem is visible to this process.
    pub host_root: PathBuf,
    /// Host directory for driver-owned files.
    pub config_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub name: String,
    pub capacity_bytes: i64,
    pub parameters: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ProvisionedVolume {
    pub capacity_bytes: i64,
    /// Attributes to persist in the volume record.
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub volume_id: String,
    pub storage_unit: String,
    pub target: PathBuf,
    pub readonly: bool,
    pub mount_flags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub total: i64,
    pub used: i64,
    pub available: i64,
}

impl Usage {
    pub fn new(total: i64, used: i64) -> Self {
        Self {
            total,
            used,
            available: total.saturating_sub(used).max(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeStats {
    pub bytes: Usage,
    pub inodes: Usage,
}

#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create_volume(&self, req: &ProvisionRequest) -> Result<ProvisionedVolume>;

    async fn delete_volume(&self, record: &VolumeRecord) -> Result<()>;

    /// Returns the capacity now in effect.
    async fn controller_expand_volume(
        &self,
        record: &VolumeRecord,
        capacity_bytes: i64,
    ) -> Result<i64>;

    async fn node_expand_volume(&self, _record: &VolumeRecord, _capacity_bytes: i64) -> Result<i64> {
        Err(Error::Unsupported("node volume expansion"))
    }

    async fn node_stage_volume(&self, _volume_id: &str, _staging_path: &Path) -> Result<()> {
        Ok(())
    }

    async fn node_unstage_volume(&self, _volume_id: &str, _staging_path: &Path) -> Result<()> {
        Ok(())
    }

    async fn node_publish_volume(&self, req: &PublishRequest) -> Result<()>;

    async fn node_unpublish_volume(&self, volume_id: &str, target: &Path) -> Result<()>;

    async fn node_get_volume_stats(&self, record: &VolumeRecord) -> Result<VolumeStats>;
}
