//! CSI Node service implementation.
//!
//! Thin gRPC layer that delegates to DriverState for business logic.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::debug;

use crate::backend::Usage;
use crate::csi;
use crate::driver::{DriverState, PublishVolume};
use crate::error::Require;

pub struct NodeService {
    state: Arc<DriverState>,
}

impl NodeService {
    pub fn new(state: Arc<DriverState>) -> Self {
        Self { state }
    }

    /// Mount flags of a mount capability. Block access is refused.
    fn mount_flags(cap: csi::VolumeCapability) -> Result<Vec<String>, Status> {
        match cap.access_type {
            Some(csi::volume_capability::AccessType::Mount(mount)) => Ok(mount.mount_flags),
            Some(csi::volume_capability::AccessType::Block(_)) => {
                Err(Status::unimplemented("block access is not supported"))
            }
            None => Err(Status::invalid_argument("volume access type is required")),
        }
    }

    fn usage_to_proto(usage: Usage, unit: csi::volume_usage::Unit) -> csi::VolumeUsage {
        csi::VolumeUsage {
            available: usage.available,
            total: usage.total,
            used: usage.used,
            unit: unit as i32,
        }
    }
}

#[tonic::async_trait]
impl csi::node_server::Node for NodeService {
    async fn node_stage_volume(
        &self,
        request: Request<csi::NodeStageVolumeRequest>,
    ) -> Result<Response<csi::NodeStageVolumeResponse>, Status> {
        let req = request.into_inner();
        let volume_id = req.volume_id.require("volume ID")?;
        let staging_path = req.staging_target_path.require("staging target path")?;
        let volume_cap = req.volume_capability.require("volume capability")?;
        Self::mount_flags(volume_cap)?;

        // Object storage needs no node-level staging.
        debug!(volume_id = %volume_id, staging_path = %staging_path, "stage volume");
        Ok(Response::new(csi::NodeStageVolumeResponse {}))
    }

    async fn node_unstage_volume(
        &self,
        request: Request<csi::NodeUnstageVolumeRequest>,
    ) -> Result<Response<csi::NodeUnstageVolumeResponse>, Status> {
        let req = request.into_inner();
        let volume_id = req.volume_id.require("volume ID")?;
        let staging_path = req.staging_target_path.require("staging target path")?;

        debug!(volume_id = %volume_id, staging_path = %staging_path, "unstage volume");
        Ok(Response::new(csi::NodeUnstageVolumeResponse {}))
    }

    async fn node_publish_volume(
        &self,
        request: Request<csi::NodePublishVolumeRequest>,
    ) -> Result<Response<csi::NodePublishVolumeResponse>, Status> {
        let req = request.into_inner();
        let volume_cap = req.volume_capability.require("volume capability")?;
        let volume_id = req.volume_id.require("volume ID")?;
        let target_path = req.target_path.require("target path")?;
        let mount_flags = Self::mount_flags(volume_cap)?;

        self.state
            .publish_volume(PublishVolume {
                volume_id,
                target: PathBuf::from(target_path),
                readonly: req.readonly,
                mount_flags,
                volume_context: req.volume_context,
                secrets: req.secrets,
            })
            .await?;

        Ok(Response::new(csi::NodePublishVolumeResponse {}))
    }

    async fn node_unpublish_volume(
        &self,
        request: Request<csi::NodeUnpublishVolumeRequest>,
    ) -> Result<Response<csi::NodeUnpublishVolumeResponse>, Status> {
        let req = request.into_inner();
        let volume_id = req.volume_id.require("volume ID")?;
        let target_path = req.target_path.require("target path")?;

        self.state
            .unpublish_volume(&volume_id, Path::new(&target_path))
            .await?;
        Ok(Response::new(csi::NodeUnpublishVolumeResponse {}))
    }

    async fn node_get_volume_stats(
        &self,
        request: Request<csi::NodeGetVolumeStatsRequest>,
    ) -> Result<Response<csi::NodeGetVolumeStatsResponse>, Status> {
        let req = request.into_inner();
        let volume_id = req.volume_id.require("volume ID")?;

        let stats = self.state.volume_stats(&volume_id).await?;

        Ok(Response::new(csi::NodeGetVolumeStatsResponse {
            usage: vec![
                Self::usage_to_proto(stats.bytes, csi::volume_usage::Unit::Bytes),
                Self::usage_to_proto(stats.inodes, csi::volume_usage::Unit::Inodes),
            ],
            volume_condition: None,
        }))
    }

    async fn node_expand_volume(
        &self,
        _request: Request<csi::NodeExpandVolumeRequest>,
    ) -> Result<Response<csi::NodeExpandVolumeResponse>, Status> {
        Err(Status::unimplemented("NodeExpandVolume is not supported"))
    }

    async fn node_get_capabilities(
        &self,
        _request: Request<csi::NodeGetCapabilitiesRequest>,
    ) -> Result<Response<csi::NodeGetCapabilitiesResponse>, Status> {
        use csi::node_service_capability::rpc::Type;

        let capabilities = [Type::StageUnstageVolume, Type::GetVolumeStats]
            .into_iter()
            .map(|t| csi::NodeServiceCapability {
                r#type: Some(csi::node_service_capability::Type::Rpc(
                    csi::node_service_capability::Rpc { r#type: t as i32 },
                )),
            })
            .collect();

        Ok(Response::new(csi::NodeGetCapabilitiesResponse {
            capabilities,
        }))
    }

    async fn node_get_info(
        &self,
        _request: Request<csi::NodeGetInfoRequest>,
    ) -> Result<Response<csi::NodeGetInfoResponse>, Status> {
        Ok(Response::new(csi::NodeGetInfoResponse {
            node_id: self.state.config.node_id.clone(),
            max_volumes_per_node: 0,
            accessible_topology: None,
        }))
    }
}
