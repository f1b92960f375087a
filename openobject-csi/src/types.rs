//! Type-safe wrappers for CSI driver domain types.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Parameter / attribute naming the backend that owns a volume.
pub const PARAM_BACKEND: &str = "backend";
/// Parameter / attribute naming the storage unit backing a volume.
///
/// As a CreateVolume parameter it overrides the default of using the volume
/// name.
pub const PARAM_STORAGE_UNIT: &str = "storageUnit";
/// Attribute recording how the storage unit was provisioned.
pub const PARAM_PROVISION_MODE: &str = "provisionMode";
/// The unit is created if missing and reused if present.
pub const PROVISION_MODE_CREATE_OR_REUSE: &str = "createOrReuse";

/// Where the CSI gRPC server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(SocketAddr),
}

impl Endpoint {
    /// Parse `unix://<path>` or `tcp://<host:port>`.
    pub fn parse(endpoint: &str) -> Result<Self, Error> {
        let invalid = || Error::InvalidEndpoint {
            endpoint: endpoint.to_string(),
        };

        if let Some(path) = endpoint.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(invalid());
            }
            Ok(Self::Unix(PathBuf::from(path)))
        } else if let Some(addr) = endpoint.strip_prefix("tcp://") {
            addr.parse().map(Self::Tcp).map_err(|_| invalid())
        } else {
            Err(invalid())
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

/// Name of a storage unit inside the object store.
///
/// Follows S3 bucket naming so a unit can later be promoted to a bucket:
/// 3 to 63 characters of lowercase letters, digits, `-` and `.`, starting and
/// ending with a letter or digit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitName(String);

impl UnitName {
    pub const MIN_LEN: usize = 3;
    pub const MAX_LEN: usize = 63;

    pub fn parse(name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        let invalid = |reason| Error::InvalidUnitName {
            name: name.clone(),
            reason,
        };

        if name.len() < Self::MIN_LEN || name.len() > Self::MAX_LEN {
            return Err(invalid("must be 3 to 63 characters"));
        }
        if !name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.')
        {
            return Err(invalid(
                "may only contain lowercase letters, digits, '-' and '.'",
            ));
        }
        let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
        let bytes = name.as_bytes();
        if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
            return Err(invalid("must start and end with a letter or digit"));
        }
        if name.contains("..") {
            return Err(invalid("must not contain consecutive dots"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_parse_unix() {
        let endpoint = Endpoint::parse("unix:///csi/csi.sock").unwrap();
        assert_eq!(endpoint, Endpoint::Unix(PathBuf::from("/csi/csi.sock")));
        assert_eq!(endpoint.to_string(), "unix:///csi/csi.sock");
    }

    #[test]
    fn endpoint_parse_tcp() {
        let endpoint = Endpoint::parse("tcp://127.0.0.1:10000").unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Tcp("127.0.0.1:10000".parse().unwrap())
        );
    }

    #[test]
    fn endpoint_parse_rejects_other_schemes() {
        assert!(Endpoint::parse("http://localhost:80").is_err());
        assert!(Endpoint::parse("/csi/csi.sock").is_err());
        assert!(Endpoint::parse("unix://").is_err());
        assert!(Endpoint::parse("tcp://not-an-addr").is_err());
    }

    #[test]
    fn unit_name_accepts_volume_style_names() {
        assert_eq!(UnitName::parse("vol-a").unwrap().as_str(), "vol-a");
        assert!(UnitName::parse("pvc-1f0c2a6e-8e0b-4a4e-9d55-0b3f0a5d2c11").is_ok());
        assert!(UnitName::parse("logs.archive").is_ok());
    }

    #[test]
    fn unit_name_rejects_bad_names() {
        assert!(UnitName::parse("ab").is_err());
        assert!(UnitName::parse("x".repeat(64)).is_err());
        assert!(UnitName::parse("Upper").is_err());
        assert!(UnitName::parse("has/slash").is_err());
        assert!(UnitName::parse("-leading").is_err());
        assert!(UnitName::parse("trailing.").is_err());
        assert!(UnitName::parse("a..b").is_err());
        assert!(UnitName::parse(".openobject").is_err());
    }
}
