//! Error types for the CSI driver.

use std::io;

use openobject_connector::ClientError;
use thiserror::Error;
use tonic::Status;

use crate::backend::s3::AdminError;

pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for validating required fields.
///
/// Returns `INVALID_ARGUMENT` status if the field is missing or empty.
pub trait Require<T> {
    fn require(self, name: &str) -> std::result::Result<T, Status>;
}

impl Require<String> for String {
    fn require(self, name: &str) -> std::result::Result<String, Status> {
        if self.is_empty() {
            Err(Status::invalid_argument(format!("{name} is required")))
        } else {
            Ok(self)
        }
    }
}

impl<T> Require<T> for Option<T> {
    fn require(self, name: &str) -> std::result::Result<T, Status> {
        self.ok_or_else(|| Status::invalid_argument(format!("{name} is required")))
    }
}

/// CSI driver errors with structured context.
#[derive(Debug, Error)]
pub enum Error {
    #[error("backend selector \"{key}\" not found in {place}", key = crate::types::PARAM_BACKEND)]
    MissingBackend { place: &'static str },

    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    #[error("volume record not found: {0}")]
    RecordNotFound(String),

    #[error("invalid volume record: {0}")]
    InvalidRecord(String),

    #[error("invalid volume ID: {0}")]
    InvalidVolumeId(String),

    #[error("secret {0} is required")]
    MissingSecret(&'static str),

    #[error("invalid secret {key}: {reason}")]
    InvalidSecret { key: &'static str, reason: String },

    #[error("no credentials available for {operation}")]
    MissingCredentials { operation: &'static str },

    #[error("invalid storage unit name {name:?}: {reason}")]
    InvalidUnitName { name: String, reason: &'static str },

    #[error("invalid endpoint: {endpoint}")]
    InvalidEndpoint { endpoint: String },

    #[error("invalid feature gate: {0}")]
    InvalidFeatureGate(String),

    #[error("volume {volume_id} already exists with {conflict}")]
    VolumeConflict { volume_id: String, conflict: String },

    #[error("volume {volume_id} cannot shrink from {current} to {requested} bytes")]
    CapacityShrink {
        volume_id: String,
        current: i64,
        requested: i64,
    },

    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    #[error("object store admin error: {0}")]
    Admin(#[from] AdminError),

    #[error("failed to {operation} {target}: {source}")]
    Bridge {
        operation: &'static str,
        target: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to resolve endpoint host {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        match &err {
            // INVALID_ARGUMENT: Client provided invalid input
            Error::MissingBackend { .. }
            | Error::InvalidVolumeId(_)
            | Error::MissingSecret(_)
            | Error::InvalidSecret { .. }
            | Error::InvalidUnitName { .. }
            | Error::InvalidEndpoint { .. }
            | Error::InvalidFeatureGate(_)
            | Error::CapacityShrink { .. } => tonic::Status::invalid_argument(err.to_string()),

            // ALREADY_EXISTS: Same name, incompatible request
            Error::VolumeConflict { .. } => tonic::Status::already_exists(err.to_string()),

            // UNIMPLEMENTED: Capability not offered by this backend
            Error::Unsupported(_) => tonic::Status::unimplemented(err.to_string()),

            // INTERNAL: Record lookups, backend and bridge failures
            Error::UnknownBackend(_)
            | Error::RecordNotFound(_)
            | Error::InvalidRecord(_)
            | Error::MissingCredentials { .. }
            | Error::Admin(_)
            | Error::Bridge { .. }
            | Error::Resolve { .. }
            | Error::Io(_)
            | Error::Json(_) => tonic::Status::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn missing_selector_is_invalid_argument() {
        let status = Status::from(Error::MissingBackend {
            place: "parameters",
        });
        assert_eq!(status.code(), Code::InvalidArgument);
        assert!(status.message().contains("backend"));
    }

    #[test]
    fn unknown_selector_is_internal() {
        let status = Status::from(Error::UnknownBackend("nfs".to_string()));
        assert_eq!(status.code(), Code::Internal);
    }

    #[test]
    fn record_lookup_failure_is_internal() {
        let status = Status::from(Error::RecordNotFound("vol-a".to_string()));
        assert_eq!(status.code(), Code::Internal);
    }

    #[test]
    fn bridge_failure_keeps_daemon_text() {
        let status = Status::from(Error::Bridge {
            operation: "unmount",
            target: "/mnt/x".to_string(),
            source: ClientError::Rejected {
                reply: "Fail: umount /mnt/x, error: exit status 32".to_string(),
            },
        });
        assert_eq!(status.code(), Code::Internal);
        assert!(
            status
                .message()
                .contains("Fail: umount /mnt/x, error: exit status 32")
        );
    }

    #[test]
    fn conflicting_create_is_already_exists() {
        let status = Status::from(Error::VolumeConflict {
            volume_id: "pvc-1".to_string(),
            conflict: "storageUnit \"first-unit\"".to_string(),
        });
        assert_eq!(status.code(), Code::AlreadyExists);
    }

    #[test]
    fn shrinking_is_invalid_argument() {
        let status = Status::from(Error::CapacityShrink {
            volume_id: "pvc-1".to_string(),
            current: 10,
            requested: 1,
        });
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[test]
    fn unsupported_is_unimplemented() {
        let status = Status::from(Error::Unsupported("node volume expansion"));
        assert_eq!(status.code(), Code::Unimplemented);
    }

    #[test]
    fn require_rejects_empty_string_and_none() {
        let err = String::new().require("volume ID").unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert_eq!(err.message(), "volume ID is required");

        let err = None::<u8>.require("volume capability").unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);

        assert_eq!("x".to_string().require("name").unwrap(), "x");
    }
}
