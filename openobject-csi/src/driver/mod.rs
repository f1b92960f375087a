//! CSI driver implementation.
//!
//! This module contains the core driver components:
//! - `Config`: Driver configuration
//! - `FeatureGates`: Optional behaviour toggled from the command line
//! - `Driver`: The main CSI driver that runs gRPC servers
//! - `DriverState`: Request validation and backend dispatch (in `state` submodule)

mod state;

pub use state::{DriverState, PublishVolume};

use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use openobject_connector::ConnectorClient;
use tokio::net::UnixListener;
use tonic::transport::Server;
use tracing::{info, warn};

use crate::backend::{BackendContext, BackendRegistry};
use crate::controller::ControllerService;
use crate::csi::{
    FILE_DESCRIPTOR_SET, controller_server::ControllerServer, identity_server::IdentityServer,
    node_server::NodeServer,
};
use crate::error::{Error, Result};
use crate::identity::IdentityService;
use crate::mount::ProcMounts;
use crate::node::NodeService;
use crate::records::DirRecordStore;
use crate::types::Endpoint;

pub const DRIVER_NAME: &str = "object.csi.openobject.io";
pub const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default volume size: 1 GiB.
pub const DEFAULT_VOLUME_SIZE: i64 = 1 << 30;

pub const DEFAULT_ENDPOINT: &str = "unix:///csi/csi.sock";
pub const DEFAULT_DATA_DIR: &str = "/var/lib/openobject-csi";
pub const DEFAULT_CONNECTOR_SOCKET: &str = "/host/etc/open-object/connector.sock";
pub const DEFAULT_HOST_ROOT: &str = "/host";

/// Optional driver behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureGates {
    /// Enforce capacity as a storage unit quota.
    pub quota: bool,
}

impl FeatureGates {
    /// Parse a comma-separated `Name=bool` list, e.g. `Quota=true`.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut gates = Self::default();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let invalid = || Error::InvalidFeatureGate(entry.to_string());
            let (name, value) = entry.split_once('=').ok_or_else(invalid)?;
            let enabled: bool = value.trim().parse().map_err(|_| invalid())?;
            match name.trim() {
                "Quota" => gates.quota = enabled,
                _ => return Err(invalid()),
            }
        }
        Ok(gates)
    }
}

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    pub version: String,
    pub node_id: String,
    pub endpoint: String,
    /// Root of the volume record store (`volumes/`) and of the node-local
    /// publish records (`published/`).
    pub data_dir: PathBuf,
    pub connector_socket: PathBuf,
    pub host_root: PathBuf,
    pub config_dir: PathBuf,
    pub features: FeatureGates,
    /// Credentials for node RPCs that carry no secrets of their own.
    pub node_secrets: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: DRIVER_NAME.to_string(),
            version: DRIVER_VERSION.to_string(),
            node_id: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            connector_socket: PathBuf::from(DEFAULT_CONNECTOR_SOCKET),
            host_root: PathBuf::from(DEFAULT_HOST_ROOT),
            config_dir: PathBuf::from(openobject_connector::CONFIG_DIR),
            features: FeatureGates::default(),
            node_secrets: HashMap::new(),
        }
    }
}

impl Config {
    pub fn backend_context(&self, bridge: Arc<dyn openobject_connector::Bridge>) -> BackendContext {
        BackendContext {
            bridge,
            features: self.features,
            host_root: self.host_root.clone(),
            config_dir: self.config_dir.clone(),
        }
    }
}

/// The CSI driver.
pub struct Driver {
    state: Arc<DriverState>,
}

impl Driver {
    pub fn new(config: Config) -> Result<Self> {
        let records_dir = config.data_dir.join("volumes");
        let published_dir = config.data_dir.join("published");
        fs::create_dir_all(&records_dir)?;
        fs::create_dir_all(&published_dir)?;

        let bridge = Arc::new(ConnectorClient::new(config.connector_socket.clone()));
        let state = DriverState::new(
            config,
            BackendRegistry::with_defaults(),
            Arc::new(DirRecordStore::new(records_dir)),
            Arc::new(DirRecordStore::new(published_dir)),
            Arc::new(ProcMounts::default()),
            bridge,
        );
        Ok(Self {
            state: Arc::new(state),
        })
    }

    /// Run the CSI driver.
    pub async fn run(&self) -> Result<()> {
        let endpoint = Endpoint::parse(&self.state.config.endpoint)?;
        info!(
            name = %self.state.config.name,
            version = %self.state.config.version,
            %endpoint,
            connector = %self.state.config.connector_socket.display(),
            quota = self.state.config.features.quota,
            "starting CSI driver"
        );

        match endpoint {
            Endpoint::Unix(path) => self.run_unix(&path).await,
            Endpoint::Tcp(addr) => self.run_tcp(addr).await,
        }
    }

    async fn run_unix(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => info!(path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove stale socket"),
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(path)?;
        let incoming = tokio_stream::wrappers::UnixListenerStream::new(listener);

        self.serve_grpc(incoming).await
    }

    async fn run_tcp(&self, addr: SocketAddr) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let incoming = tokio_stream::wrappers::TcpListenerStream::new(listener);

        self.serve_grpc(incoming).await
    }

    async fn serve_grpc<S, IO, E>(&self, incoming: S) -> Result<()>
    where
        S: tokio_stream::Stream<Item = std::result::Result<IO, E>> + Send + 'static,
        IO: tokio::io::AsyncRead
            + tokio::io::AsyncWrite
            + tonic::transport::server::Connected
            + Send
            + Unpin
            + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        Server::builder()
            .add_service(reflection)
            .add_service(IdentityServer::new(IdentityService::new(
                self.state.clone(),
            )))
            .add_service(ControllerServer::new(ControllerService::new(
                self.state.clone(),
            )))
            .add_service(NodeServer::new(NodeService::new(self.state.clone())))
            .serve_with_incoming(incoming)
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_gates_parse() {
        assert_eq!(FeatureGates::parse("").unwrap(), FeatureGates::default());
        assert!(FeatureGates::parse("Quota=true").unwrap().quota);
        assert!(!FeatureGates::parse("Quota=true, Quota=false").unwrap().quota);
    }

    #[test]
    fn feature_gates_reject_unknown_or_malformed() {
        assert!(matches!(
            FeatureGates::parse("Snapshots=true"),
            Err(Error::InvalidFeatureGate(gate)) if gate == "Snapshots=true"
        ));
        assert!(FeatureGates::parse("Quota").is_err());
        assert!(FeatureGates::parse("Quota=yes").is_err());
    }

    #[test]
    fn default_config_points_at_host_connector() {
        let config = Config::default();
        assert_eq!(config.name, DRIVER_NAME);
        assert_eq!(
            config.connector_socket,
            PathBuf::from("/host/etc/open-object/connector.sock")
        );
        assert_eq!(config.config_dir, PathBuf::from("/etc/open-object"));
    }

    #[test]
    fn driver_new_creates_record_dirs() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = Config {
            data_dir: temp.path().join("data"),
            ..Default::default()
        };
        Driver::new(config).unwrap();
        assert!(temp.path().join("data/volumes").is_dir());
        assert!(temp.path().join("data/published").is_dir());
    }
}
