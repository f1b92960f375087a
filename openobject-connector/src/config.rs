//! Configuration for the connector daemon.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Directory holding the daemon's socket, log and PID files on the host.
pub const CONFIG_DIR: &str = "/etc/open-object";

/// Prefix that moves a command into the host's PID 1 namespaces.
pub const NSENTER_PREFIX: &str =
    "/bin/nsenter --mount=/proc/1/ns/mnt --ipc=/proc/1/ns/ipc --net=/proc/1/ns/net --uts=/proc/1/ns/uts";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Unix socket the daemon listens on.
    pub socket: PathBuf,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
    pub work_dir: PathBuf,
    pub umask: u32,
    /// How long in-flight commands may run after a stop signal.
    pub shutdown_grace_ms: u64,
    /// Prepended to every command, e.g. [`NSENTER_PREFIX`].
    pub command_prefix: Option<String>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        let dir = Path::new(CONFIG_DIR);
        Self {
            socket: dir.join("connector.sock"),
            pid_file: dir.join("connector.pid"),
            log_file: dir.join("connector.log"),
            work_dir: PathBuf::from("./"),
            umask: 0o027,
            shutdown_grace_ms: 5_000,
            command_prefix: None,
        }
    }
}

impl ConnectorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: ConnectorConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.socket.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "socket",
                reason: "must not be empty",
            });
        }
        if self.umask > 0o777 {
            return Err(ConfigError::InvalidValue {
                field: "umask",
                reason: "must be an octal permission mask",
            });
        }
        Ok(())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
