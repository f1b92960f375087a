//! CSI Controller service implementation.
//!
//! Thin gRPC layer that delegates to DriverState for business logic.

use std::collections::HashMap;
use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::csi;
use crate::driver::DriverState;
use crate::error::Require;
use crate::records::VolumeRecord;

pub struct ControllerService {
    state: Arc<DriverState>,
}

impl ControllerService {
    pub fn new(state: Arc<DriverState>) -> Self {
        Self { state }
    }

    fn required_capacity(range: Option<&csi::CapacityRange>) -> i64 {
        match range {
            Some(r) if r.required_bytes > 0 => r.required_bytes,
            Some(r) if r.limit_bytes > 0 => r.limit_bytes,
            _ => crate::driver::DEFAULT_VOLUME_SIZE,
        }
    }

    /// Object storage is shared, so every access mode works. Only raw block
    /// access is refused.
    fn validate_capabilities(caps: &[csi::VolumeCapability]) -> Result<(), Status> {
        if caps.is_empty() {
            return Err(Status::invalid_argument("volume capabilities are required"));
        }
        for cap in caps {
            match cap.access_type {
                Some(csi::volume_capability::AccessType::Mount(_)) => {}
                Some(csi::volume_capability::AccessType::Block(_)) => {
                    return Err(Status::unimplemented("block access is not supported"));
                }
                None => return Err(Status::invalid_argument("volume access type is required")),
            }
            if cap.access_mode.is_none() {
                return Err(Status::invalid_argument("volume access mode is required"));
            }
        }
        Ok(())
    }

    fn volume_to_proto(record: &VolumeRecord) -> csi::Volume {
        csi::Volume {
            volume_id: record.volume_id.clone(),
            capacity_bytes: record.capacity_bytes,
            volume_context: record.attributes.clone(),
            content_source: None,
            accessible_topology: vec![],
        }
    }
}

#[tonic::async_trait]
impl csi::controller_server::Controller for ControllerService {
    async fn create_volume(
        &self,
        request: Request<csi::CreateVolumeRequest>,
    ) -> Result<Response<csi::CreateVolumeResponse>, Status> {
        let req = request.into_inner();
        let name = req.name.require("volume name")?;
        Self::validate_capabilities(&req.volume_capabilities)?;

        let capacity = Self::required_capacity(req.capacity_range.as_ref());
        let record = self
            .state
            .create_volume(&name, capacity, req.parameters, &req.secrets)
            .await?;

        Ok(Response::new(csi::CreateVolumeResponse {
            volume: Some(Self::volume_to_proto(&record)),
        }))
    }

    async fn delete_volume(
        &self,
        request: Request<csi::DeleteVolumeRequest>,
    ) -> Result<Response<csi::DeleteVolumeResponse>, Status> {
        let req = request.into_inner();
        let volume_id = req.volume_id.require("volume ID")?;

        self.state.delete_volume(&volume_id, &req.secrets).await?;
        Ok(Response::new(csi::DeleteVolumeResponse {}))
    }

    async fn controller_publish_volume(
        &self,
        _request: Request<csi::ControllerPublishVolumeRequest>,
    ) -> Result<Response<csi::ControllerPublishVolumeResponse>, Status> {
        // Nothing to attach; the node mounts the storage unit directly
        Ok(Response::new(csi::ControllerPublishVolumeResponse {
            publish_context: HashMap::new(),
        }))
    }

    async fn controller_unpublish_volume(
        &self,
        _request: Request<csi::ControllerUnpublishVolumeRequest>,
    ) -> Result<Response<csi::ControllerUnpublishVolumeResponse>, Status> {
        Ok(Response::new(csi::ControllerUnpublishVolumeResponse {}))
    }

    async fn validate_volume_capabilities(
        &self,
        request: Request<csi::ValidateVolumeCapabilitiesRequest>,
    ) -> Result<Response<csi::ValidateVolumeCapabilitiesResponse>, Status> {
        let req = request.into_inner();
        let volume_id = req.volume_id.require("volume ID")?;

        let record = self.state.get_volume(&volume_id).await?;

        if let Err(e) = Self::validate_capabilities(&req.volume_capabilities) {
            return Ok(Response::new(csi::ValidateVolumeCapabilitiesResponse {
                confirmed: None,
                message: e.message().to_string(),
            }));
        }

        Ok(Response::new(csi::ValidateVolumeCapabilitiesResponse {
            confirmed: Some(csi::validate_volume_capabilities_response::Confirmed {
                volume_context: record.attributes,
                volume_capabilities: req.volume_capabilities,
                parameters: req.parameters,
                mutable_parameters: HashMap::new(),
            }),
            message: String::new(),
        }))
    }

    async fn list_volumes(
        &self,
        request: Request<csi::ListVolumesRequest>,
    ) -> Result<Response<csi::ListVolumesResponse>, Status> {
        let req = request.into_inner();

        let all_volumes = self.state.list_volumes().await?;

        // Handle pagination
        let start = if req.starting_token.is_empty() {
            0
        } else {
            req.starting_token
                .parse::<usize>()
                .ok()
                .filter(|&start| start <= all_volumes.len())
                .ok_or_else(|| {
                    Status::aborted(format!("invalid starting token: {}", req.starting_token))
                })?
        };
        let max = if req.max_entries > 0 {
            req.max_entries as usize
        } else {
            all_volumes.len()
        };

        let entries: Vec<_> = all_volumes
            .iter()
            .skip(start)
            .take(max)
            .map(|record| csi::list_volumes_response::Entry {
                volume: Some(Self::volume_to_proto(record)),
                status: None,
            })
            .collect();

        let next_token = if start + entries.len() < all_volumes.len() {
            (start + entries.len()).to_string()
        } else {
            String::new()
        };

        Ok(Response::new(csi::ListVolumesResponse {
            entries,
            next_token,
        }))
    }

    async fn get_capacity(
        &self,
        _request: Request<csi::GetCapacityRequest>,
    ) -> Result<Response<csi::GetCapacityResponse>, Status> {
        Err(Status::unimplemented("GetCapacity is not supported"))
    }

    async fn controller_get_capabilities(
        &self,
        _request: Request<csi::ControllerGetCapabilitiesRequest>,
    ) -> Result<Response<csi::ControllerGetCapabilitiesResponse>, Status> {
        use csi::controller_service_capability::rpc::Type;

        let capabilities = [
            Type::CreateDeleteVolume,
            Type::ExpandVolume,
            Type::ListVolumes,
            Type::GetVolume,
        ]
        .into_iter()
        .map(|t| csi::ControllerServiceCapability {
            r#type: Some(csi::controller_service_capability::Type::Rpc(
                csi::controller_service_capability::Rpc { r#type: t as i32 },
            )),
        })
        .collect();

        Ok(Response::new(csi::ControllerGetCapabilitiesResponse {
            capabilities,
        }))
    }

    async fn create_snapshot(
        &self,
        _request: Request<csi::CreateSnapshotRequest>,
    ) -> Result<Response<csi::CreateSnapshotResponse>, Status> {
        Err(Status::unimplemented("snapshots are not supported"))
    }

    async fn delete_snapshot(
        &self,
        _request: Request<csi::DeleteSnapshotRequest>,
    ) -> Result<Response<csi::DeleteSnapshotResponse>, Status> {
        Err(Status::unimplemented("snapshots are not supported"))
    }

    async fn list_snapshots(
        &self,
        _request: Request<csi::ListSnapshotsRequest>,
    ) -> Result<Response<csi::ListSnapshotsResponse>, Status> {
        Err(Status::unimplemented("snapshots are not supported"))
    }

    async fn get_snapshot(
        &self,
        _request: Request<csi::GetSnapshotRequest>,
    ) -> Result<Response<csi::GetSnapshotResponse>, Status> {
        Err(Status::unimplemented("snapshots are not supported"))
    }

    async fn controller_expand_volume(
        &self,
        request: Request<csi::ControllerExpandVolumeRequest>,
    ) -> Result<Response<csi::ControllerExpandVolumeResponse>, Status> {
        let req = request.into_inner();
        let volume_id = req.volume_id.require("volume ID")?;
        let range = req.capacity_range.require("capacity range")?;
        if range.required_bytes <= 0 {
            return Err(Status::invalid_argument(
                "capacity range required bytes must be positive",
            ));
        }
        let capacity = range.required_bytes;

        let record = self
            .state
            .expand_volume(&volume_id, capacity, &req.secrets)
            .await?;

        Ok(Response::new(csi::ControllerExpandVolumeResponse {
            capacity_bytes: record.capacity_bytes,
            node_expansion_required: false,
        }))
    }

    async fn controller_get_volume(
        &self,
        request: Request<csi::ControllerGetVolumeRequest>,
    ) -> Result<Response<csi::ControllerGetVolumeResponse>, Status> {
        let req = request.into_inner();
        let volume_id = req.volume_id.require("volume ID")?;
        let record = self.state.get_volume(&volume_id).await?;

        Ok(Response::new(csi::ControllerGetVolumeResponse {
            volume: Some(Self::volume_to_proto(&record)),
            status: Some(csi::controller_get_volume_response::VolumeStatus {
                volume_condition: Some(csi::VolumeCondition {
                    abnormal: false,
                    message: String::new(),
                }),
                published_node_ids: vec![],
            }),
        }))
    }

    async fn controller_modify_volume(
        &self,
        _request: Request<csi::ControllerModifyVolumeRequest>,
    ) -> Result<Response<csi::ControllerModifyVolumeResponse>, Status> {
        Err(Status::unimplemented("volume modification is not supported"))
    }
}
