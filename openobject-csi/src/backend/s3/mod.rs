//! S3-compatible object store backend.
//!
//! Storage units are managed with a [`BucketAdmin`]; mounts are s3fs
//! processes started on the host through the connector.

mod admin;
mod config;
mod mounter;

pub use admin::{
    AdminError, BucketAdmin, METADATA_PREFIX, ObjectStoreAdmin, UNIT_INODE_LIMIT, UnitMetadata,
    UnitUsage,
};
pub use config::{
    S3Config, SECRET_ACCESS_KEY_ID, SECRET_BUCKET, SECRET_ENDPOINT, SECRET_REGION,
    SECRET_SECRET_ACCESS_KEY, resolve_endpoint,
};
pub use mounter::{Mounter, S3FS_FSTYPE, S3fsMount, shell_quote};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::backend::{
    Backend, BackendContext, BackendFactory, ProvisionRequest, ProvisionedVolume, PublishRequest,
    Secrets, Usage, VolumeStats,
};
use crate::error::{Error, Result};
use crate::records::VolumeRecord;
use crate::types::{
    PARAM_BACKEND, PARAM_PROVISION_MODE, PARAM_STORAGE_UNIT, PROVISION_MODE_CREATE_OR_REUSE,
    UnitName,
};

/// Selector value for this backend.
pub const BACKEND_NAME: &str = "s3";

/// Builds an [`S3Backend`] connected to the endpoint named in the secrets.
pub fn factory() -> BackendFactory {
    Arc::new(
        |ctx: &BackendContext, secrets: &Secrets| -> Result<Box<dyn Backend>> {
            let config = S3Config::from_secrets(secrets)?;
            let admin: Option<Arc<dyn BucketAdmin>> = match &config {
                Some(config) => Some(Arc::new(ObjectStoreAdmin::connect(config)?)),
                None => None,
            };
            Ok(Box::new(S3Backend::new(ctx, config, admin)))
        },
    )
}

pub struct S3Backend {
    config: Option<S3Config>,
    admin: Option<Arc<dyn BucketAdmin>>,
    mounter: Mounter,
    quota: bool,
}

impl S3Backend {
    pub fn new(
        ctx: &BackendContext,
        config: Option<S3Config>,
        admin: Option<Arc<dyn BucketAdmin>>,
    ) -> Self {
        Self {
            config,
            admin,
            mounter: Mounter::new(
                Arc::clone(&ctx.bridge),
                ctx.host_root.clone(),
                ctx.config_dir.clone(),
            ),
            quota: ctx.features.quota,
        }
    }

    fn admin(&self, operation: &'static str) -> Result<&dyn BucketAdmin> {
        self.admin
            .as_deref()
            .ok_or(Error::MissingCredentials { operation })
    }

    fn config(&self, operation: &'static str) -> Result<&S3Config> {
        self.config
            .as_ref()
            .ok_or(Error::MissingCredentials { operation })
    }
}

#[async_trait]
impl Backend for S3Backend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn create_volume(&self, req: &ProvisionRequest) -> Result<ProvisionedVolume> {
        let admin = self.admin("create volume")?;
        let unit = match req.parameters.get(PARAM_STORAGE_UNIT) {
            Some(name) if !name.is_empty() => UnitName::parse(name.as_str())?,
            _ => UnitName::parse(req.name.as_str())?,
        };

        let created = admin.create_unit(&unit, req.capacity_bytes).await?;
        if self.quota {
            admin.set_quota(&unit, req.capacity_bytes).await?;
        }
        info!(
            volume = %req.name,
            unit = %unit,
            created,
            capacity_bytes = req.capacity_bytes,
            "storage unit ready"
        );

        let mut attributes: HashMap<String, String> = req.parameters.clone();
        attributes.insert(PARAM_BACKEND.to_string(), BACKEND_NAME.to_string());
        attributes.insert(PARAM_STORAGE_UNIT.to_string(), unit.to_string());
        attributes.insert(
            PARAM_PROVISION_MODE.to_string(),
            PROVISION_MODE_CREATE_OR_REUSE.to_string(),
        );

        Ok(ProvisionedVolume {
            capacity_bytes: req.capacity_bytes,
            attributes,
        })
    }

    async fn delete_volume(&self, record: &VolumeRecord) -> Result<()> {
        let admin = self.admin("delete volume")?;
        let unit = UnitName::parse(record.storage_unit())?;

        match admin.delete_unit(&unit).await {
            Ok(()) => info!(volume_id = %record.volume_id, unit = %unit, "deleted storage unit"),
            Err(AdminError::NotFound(_)) => {
                warn!(volume_id = %record.volume_id, unit = %unit, "storage unit already gone");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn controller_expand_volume(
        &self,
        record: &VolumeRecord,
        capacity_bytes: i64,
    ) -> Result<i64> {
        let admin = self.admin("expand volume")?;
        let unit = UnitName::parse(record.storage_unit())?;

        if self.quota {
            admin.set_quota(&unit, capacity_bytes).await?;
        }
        let mut metadata = admin.metadata(&unit).await?;
        metadata.capacity_bytes = capacity_bytes;
        admin.set_metadata(&unit, &metadata).await?;

        info!(volume_id = %record.volume_id, unit = %unit, capacity_bytes, "expanded volume");
        Ok(capacity_bytes)
    }

    async fn node_publish_volume(&self, req: &PublishRequest) -> Result<()> {
        let config = self.config("mount volume")?;
        let endpoint = resolve_endpoint(&config.endpoint).await?;

        self.mounter
            .write_credentials(&req.volume_id, &config.passwd_line())
            .await?;

        let mount = S3fsMount {
            volume_id: &req.volume_id,
            bucket: &config.bucket,
            unit: &req.storage_unit,
            endpoint: &endpoint,
            target: &req.target,
            readonly: req.readonly,
            flags: &req.mount_flags,
        };
        if let Err(e) = self.mounter.mount(&mount).await {
            if let Err(cleanup) = self.mounter.remove_credentials(&req.volume_id).await {
                warn!(volume_id = %req.volume_id, error = %cleanup, "cleanup failed");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn node_unpublish_volume(&self, volume_id: &str, target: &Path) -> Result<()> {
        if !self.mounter.is_mounted(target).await {
            info!(volume_id, target = %target.display(), "no s3fs mount at target");
            return Ok(());
        }
        self.mounter.unmount(target).await?;
        self.mounter.remove_credentials(volume_id).await
    }

    async fn node_get_volume_stats(&self, record: &VolumeRecord) -> Result<VolumeStats> {
        let admin = self.admin("volume stats")?;
        let unit = UnitName::parse(record.storage_unit())?;

        let metadata = admin.metadata(&unit).await?;
        let usage = admin.usage(&unit).await?;
        let total = metadata.quota_bytes.unwrap_or(metadata.capacity_bytes);

        Ok(VolumeStats {
            bytes: Usage::new(total, usage.used_bytes),
            inodes: Usage::new(UNIT_INODE_LIMIT, usage.objects),
        })
    }
}
