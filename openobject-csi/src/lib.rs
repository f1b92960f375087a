//! openobject-csi: CSI driver for object-store-backed volumes.
//!
//! This crate implements the Container Storage Interface (CSI) specification
//! to expose object store buckets as filesystems to container orchestrators
//! like Kubernetes. Mounts run on the host through the openobject connector.

// Generated protobuf code has doc formatting issues
#![allow(clippy::doc_overindented_list_items)]
#![allow(clippy::doc_lazy_continuation)]
// tonic::Status is large by design (176 bytes)
#![allow(clippy::result_large_err)]

pub mod backend;
pub mod controller;
pub mod driver;
pub mod error;
pub mod identity;
pub mod mount;
pub mod node;
pub mod records;
pub mod types;

pub mod csi {
    tonic::include_proto!("csi.v1");

    pub use prost_types::Timestamp;

    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("csi_descriptor");
}

pub use backend::{Backend, BackendRegistry};
pub use driver::{Config, Driver, FeatureGates};
pub use error::{Error, Result};
pub use records::{DirRecordStore, VolumeRecord, VolumeRecords};
pub use types::Endpoint;

#[cfg(test)]
pub(crate) mod test_util;
