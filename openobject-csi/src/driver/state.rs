//! Driver state and request dispatch.
//!
//! DriverState sits between the gRPC services and the backends. It:
//! - resolves the backend selector from parameters, volume context or record
//! - builds a fresh backend for each call from the supplied credentials
//! - persists volume records on create and expand
//! - short-circuits publish/unpublish based on the node mount table
//!
//! The controller's volume records are not necessarily visible on a node, so
//! NodePublishVolume also keeps a node-local copy of the volume context. Node
//! RPCs that only carry a volume ID fall back to it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use openobject_connector::Bridge;
use tracing::{debug, info, warn};

use crate::backend::{
    Backend, BackendContext, BackendRegistry, ProvisionRequest, PublishRequest, Secrets,
    VolumeStats, s3::Mounter,
};
use crate::error::{Error, Result};
use crate::mount::MountTable;
use crate::records::{VolumeRecord, VolumeRecords};
use crate::types::{PARAM_BACKEND, PARAM_STORAGE_UNIT};

use super::Config;

/// Inputs to NodePublishVolume after field validation.
#[derive(Debug, Clone)]
pub struct PublishVolume {
    pub volume_id: String,
    pub target: PathBuf,
    pub readonly: bool,
    pub mount_flags: Vec<String>,
    pub volume_context: HashMap<String, String>,
    pub secrets: Secrets,
}

/// Shared driver state.
pub struct DriverState {
    pub config: Config,
    registry: BackendRegistry,
    records: Arc<dyn VolumeRecords>,
    published: Arc<dyn VolumeRecords>,
    mounts: Arc<dyn MountTable>,
    ctx: BackendContext,
}

fn selector<'a>(attributes: &'a HashMap<String, String>, place: &'static str) -> Result<&'a str> {
    attributes
        .get(PARAM_BACKEND)
        .map(String::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(Error::MissingBackend { place })
}

/// How a repeated CreateVolume differs from the stored record, if at all.
fn create_conflict(
    record: &VolumeRecord,
    capacity_bytes: i64,
    parameters: &HashMap<String, String>,
) -> Option<String> {
    if record.capacity_bytes < capacity_bytes {
        return Some(format!("capacity {} bytes", record.capacity_bytes));
    }

    let unit = parameters
        .get(PARAM_STORAGE_UNIT)
        .map(String::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(&record.volume_id);
    if unit != record.storage_unit() {
        return Some(format!("{PARAM_STORAGE_UNIT} {:?}", record.storage_unit()));
    }

    parameters
        .iter()
        .find(|(key, value)| record.attributes.get(*key) != Some(*value))
        .map(|(key, _)| {
            let stored = record.attributes.get(key).map(String::as_str).unwrap_or("");
            format!("{key} {stored:?}")
        })
}

impl DriverState {
    pub fn new(
        config: Config,
        registry: BackendRegistry,
        records: Arc<dyn VolumeRecords>,
        published: Arc<dyn VolumeRecords>,
        mounts: Arc<dyn MountTable>,
        bridge: Arc<dyn Bridge>,
    ) -> Self {
        let ctx = config.backend_context(bridge);
        Self {
            config,
            registry,
            records,
            published,
            mounts,
            ctx,
        }
    }

    fn backend(&self, name: &str, secrets: &Secrets) -> Result<Box<dyn Backend>> {
        self.registry.build(name, &self.ctx, secrets)
    }

    /// Backend for a recorded volume.
    fn record_backend(&self, record: &VolumeRecord, secrets: &Secrets) -> Result<Box<dyn Backend>> {
        let name = selector(&record.attributes, "volume record")?;
        self.backend(name, secrets)
    }

    /// Controller record, or the context saved when the volume was published
    /// on this node.
    async fn node_record(&self, volume_id: &str) -> Result<Option<VolumeRecord>> {
        if let Some(record) = self.records.get(volume_id).await? {
            return Ok(Some(record));
        }
        self.published.get(volume_id).await
    }

    /// Provision a volume and persist its record.
    ///
    /// Repeating the call for an existing volume returns the stored record
    /// without touching the backend, or `VolumeConflict` when the request
    /// asks for something the stored volume does not satisfy.
    pub async fn create_volume(
        &self,
        name: &str,
        capacity_bytes: i64,
        parameters: HashMap<String, String>,
        secrets: &Secrets,
    ) -> Result<VolumeRecord> {
        debug_assert!(!name.is_empty(), "name must not be empty");

        let backend_name = selector(&parameters, "parameters")?.to_string();

        if let Some(record) = self.records.get(name).await? {
            if let Some(conflict) = create_conflict(&record, capacity_bytes, &parameters) {
                return Err(Error::VolumeConflict {
                    volume_id: name.to_string(),
                    conflict,
                });
            }
            debug!(volume_id = name, "volume already exists");
            return Ok(record);
        }

        let backend = self.backend(&backend_name, secrets)?;
        let provisioned = backend
            .create_volume(&ProvisionRequest {
                name: name.to_string(),
                capacity_bytes,
                parameters,
            })
            .await?;

        let mut attributes = provisioned.attributes;
        attributes.insert(PARAM_BACKEND.to_string(), backend_name);
        let record = self
            .records
            .create(VolumeRecord::new(name, provisioned.capacity_bytes, attributes))
            .await?;

        info!(
            volume_id = %record.volume_id,
            backend = backend.name(),
            capacity_bytes = record.capacity_bytes,
            "created volume"
        );
        Ok(record)
    }

    pub async fn delete_volume(&self, volume_id: &str, secrets: &Secrets) -> Result<()> {
        let record = self.records.lookup(volume_id).await?;
        let backend = self.record_backend(&record, secrets)?;

        backend.delete_volume(&record).await?;
        self.records.delete(volume_id).await?;

        info!(volume_id, "deleted volume");
        Ok(())
    }

    /// Returns the updated record. Shrinking is refused.
    pub async fn expand_volume(
        &self,
        volume_id: &str,
        capacity_bytes: i64,
        secrets: &Secrets,
    ) -> Result<VolumeRecord> {
        let record = self.records.lookup(volume_id).await?;
        if capacity_bytes < record.capacity_bytes {
            return Err(Error::CapacityShrink {
                volume_id: volume_id.to_string(),
                current: record.capacity_bytes,
                requested: capacity_bytes,
            });
        }
        let backend = self.record_backend(&record, secrets)?;

        let capacity = backend
            .controller_expand_volume(&record, capacity_bytes)
            .await?;
        let record = self.records.update_capacity(volume_id, capacity).await?;

        info!(volume_id, capacity_bytes = capacity, "expanded volume");
        Ok(record)
    }

    pub async fn get_volume(&self, volume_id: &str) -> Result<VolumeRecord> {
        self.records.lookup(volume_id).await
    }

    pub async fn list_volumes(&self) -> Result<Vec<VolumeRecord>> {
        self.records.list().await
    }

    pub async fn publish_volume(&self, req: PublishVolume) -> Result<()> {
        let name = selector(&req.volume_context, "volume context")?;
        let backend = self.backend(name, &req.secrets)?;

        if self.mounts.prepare_target(&req.target).await? {
            info!(
                volume_id = %req.volume_id,
                target = %req.target.display(),
                "target already mounted"
            );
        } else {
            let storage_unit = req
                .volume_context
                .get(PARAM_STORAGE_UNIT)
                .filter(|s| !s.is_empty())
                .cloned()
                .unwrap_or_else(|| req.volume_id.clone());

            backend
                .node_publish_volume(&PublishRequest {
                    volume_id: req.volume_id.clone(),
                    storage_unit,
                    target: req.target,
                    readonly: req.readonly,
                    mount_flags: req.mount_flags,
                })
                .await?;
        }

        self.published
            .create(VolumeRecord::new(req.volume_id, 0, req.volume_context))
            .await?;
        Ok(())
    }

    pub async fn unpublish_volume(&self, volume_id: &str, target: &Path) -> Result<()> {
        if !self.mounts.is_mount_point(target).await? {
            info!(volume_id, target = %target.display(), "target not mounted");
            return Ok(());
        }

        let record = match self.node_record(volume_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(volume_id, error = %e, "volume record unreadable, unmounting directly");
                None
            }
        };
        let backend = record
            .as_ref()
            .and_then(|r| r.backend())
            .filter(|name| self.registry.contains(name));

        match backend {
            Some(name) => {
                self.backend(name, &self.config.node_secrets)?
                    .node_unpublish_volume(volume_id, target)
                    .await?;
            }
            None => {
                let mounter = Mounter::new(
                    Arc::clone(&self.ctx.bridge),
                    self.ctx.host_root.clone(),
                    self.ctx.config_dir.clone(),
                );
                mounter.unmount(target).await?;
                mounter.remove_credentials(volume_id).await?;
            }
        }

        if let Err(e) = self.published.delete(volume_id).await {
            warn!(volume_id, error = %e, "failed to drop publish record");
        }
        Ok(())
    }

    pub async fn volume_stats(&self, volume_id: &str) -> Result<VolumeStats> {
        let record = self
            .node_record(volume_id)
            .await?
            .ok_or_else(|| Error::RecordNotFound(volume_id.to_string()))?;
        self.record_backend(&record, &self.config.node_secrets)?
            .node_get_volume_stats(&record)
            .await
    }
}
