//! Shared test utilities for CSI driver tests.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use object_store::memory::InMemory;
use openobject_connector::{Bridge, ClientError};
use tempfile::TempDir;

use crate::backend::s3::{self, BucketAdmin, ObjectStoreAdmin, S3Backend, S3Config};
use crate::backend::{Backend, BackendContext, BackendRegistry, Secrets};
use crate::controller::ControllerService;
use crate::driver::{Config, DRIVER_NAME, DRIVER_VERSION, DriverState, FeatureGates};
use crate::identity::IdentityService;
use crate::mount::MountTable;
use crate::node::NodeService;
use crate::records::MemoryRecordStore;
use crate::types::PARAM_BACKEND;

pub fn s3_secrets() -> Secrets {
    HashMap::from([
        (s3::SECRET_ENDPOINT.to_string(), "http://127.0.0.1:9000".to_string()),
        (s3::SECRET_ACCESS_KEY_ID.to_string(), "test-access-key".to_string()),
        (s3::SECRET_SECRET_ACCESS_KEY.to_string(), "test-secret-key".to_string()),
        (s3::SECRET_BUCKET.to_string(), "volumes".to_string()),
    ])
}

/// Parameters (or volume context) selecting the S3 backend.
pub fn s3_parameters() -> HashMap<String, String> {
    HashMap::from([(PARAM_BACKEND.to_string(), s3::BACKEND_NAME.to_string())])
}

pub fn backend_context(host_root: &Path) -> BackendContext {
    BackendContext {
        bridge: Arc::new(FakeBridge::new()),
        features: FeatureGates::default(),
        host_root: host_root.to_path_buf(),
        config_dir: PathBuf::from(openobject_connector::CONFIG_DIR),
    }
}

/// Bridge that records commands instead of running them.
///
/// `grep` mount checks succeed only while `s3fs_mounted` is set, mirroring
/// grep's non-zero exit when nothing matches.
#[derive(Default)]
pub struct FakeBridge {
    commands: Mutex<Vec<String>>,
    s3fs_mounted: AtomicBool,
    failing_prefix: Mutex<Option<String>>,
}

impl FakeBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn set_s3fs_mounted(&self, mounted: bool) {
        self.s3fs_mounted.store(mounted, Ordering::SeqCst);
    }

    pub fn fail_commands_starting_with(&self, prefix: &str) {
        *self.failing_prefix.lock().unwrap() = Some(prefix.to_string());
    }

    fn rejected(command: &str, error: &str) -> ClientError {
        ClientError::Rejected {
            reply: format!("Fail: {command}, error: {error}"),
        }
    }
}

#[async_trait]
impl Bridge for FakeBridge {
    async fn exec(&self, command: &str) -> Result<String, ClientError> {
        self.commands.lock().unwrap().push(command.to_string());

        let failing = self.failing_prefix.lock().unwrap().clone();
        if failing.is_some_and(|prefix| command.starts_with(&prefix)) {
            return Err(Self::rejected(command, "exit status 32"));
        }
        if command.starts_with("grep") {
            return if self.s3fs_mounted.load(Ordering::SeqCst) {
                Ok("1\n".to_string())
            } else {
                Err(Self::rejected(command, "exit status 1"))
            };
        }
        Ok(String::new())
    }
}

/// Mount table backed by a set of paths.
#[derive(Default)]
pub struct FakeMounts {
    mounted: Mutex<HashSet<PathBuf>>,
}

impl FakeMounts {
    pub fn mount(&self, path: &Path) {
        self.mounted.lock().unwrap().insert(path.to_path_buf());
    }
}

#[async_trait]
impl MountTable for FakeMounts {
    async fn is_mount_point(&self, path: &Path) -> io::Result<bool> {
        Ok(self.mounted.lock().unwrap().contains(path))
    }

    async fn prepare_target(&self, path: &Path) -> io::Result<bool> {
        self.is_mount_point(path).await
    }
}

/// Test fixture providing isolated driver state for each test.
///
/// The `s3` backend talks to an in-memory object store shared by every
/// backend instance the fixture builds.
pub struct TestFixture {
    pub state: Arc<DriverState>,
    pub admin: Arc<ObjectStoreAdmin>,
    pub bridge: Arc<FakeBridge>,
    pub mounts: Arc<FakeMounts>,
    _temp_dir: TempDir,
}

impl TestFixture {
    pub fn new() -> Self {
        Self::with_node_secrets(Secrets::new())
    }

    pub fn with_node_secrets(node_secrets: Secrets) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let config = Config {
            name: DRIVER_NAME.to_string(),
            version: DRIVER_VERSION.to_string(),
            node_id: "test-node".to_string(),
            endpoint: "unix:///tmp/test.sock".to_string(),
            data_dir: temp_dir.path().join("data"),
            connector_socket: temp_dir.path().join("connector.sock"),
            host_root: temp_dir.path().join("host"),
            config_dir: PathBuf::from(openobject_connector::CONFIG_DIR),
            features: FeatureGates::default(),
            node_secrets,
        };

        let admin = Arc::new(ObjectStoreAdmin::new(Arc::new(InMemory::new())));
        let shared = Arc::clone(&admin);
        let mut registry = BackendRegistry::new();
        registry.register(
            s3::BACKEND_NAME,
            Arc::new(
                move |ctx: &BackendContext, secrets: &Secrets| -> crate::Result<Box<dyn Backend>> {
                    let config = S3Config::from_secrets(secrets)?;
                    let admin = config
                        .as_ref()
                        .map(|_| Arc::clone(&shared) as Arc<dyn BucketAdmin>);
                    Ok(Box::new(S3Backend::new(ctx, config, admin)))
                },
            ),
        );

        let bridge = Arc::new(FakeBridge::new());
        let mounts = Arc::new(FakeMounts::default());
        let state = Arc::new(DriverState::new(
            config,
            registry,
            Arc::new(MemoryRecordStore::new()),
            Arc::new(MemoryRecordStore::new()),
            mounts.clone(),
            bridge.clone(),
        ));

        Self {
            state,
            admin,
            bridge,
            mounts,
            _temp_dir: temp_dir,
        }
    }

    pub fn identity_service(&self) -> IdentityService {
        IdentityService::new(Arc::clone(&self.state))
    }

    pub fn controller_service(&self) -> ControllerService {
        ControllerService::new(Arc::clone(&self.state))
    }

    pub fn node_service(&self) -> NodeService {
        NodeService::new(Arc::clone(&self.state))
    }
}
