//! openobject-connector: privileged command bridge for the openobject CSI driver.
//!
//! The CSI node plugin runs unprivileged inside a container and cannot mount
//! FUSE filesystems on the host. The connector daemon runs on the host, listens
//! on a Unix socket and executes one command per connection on the plugin's
//! behalf.
//!
//! # Library Usage
//!
//! ```ignore
//! use openobject_connector::{Bridge, ConnectorClient};
//!
//! let client = ConnectorClient::new("/host/etc/open-object/connector.sock");
//! let stdout = client.exec("mount | grep fuse.s3fs").await?;
//! ```

pub mod client;
pub mod config;
pub mod daemon;
pub mod error;
pub mod exec;
pub mod listener;
pub mod protocol;

pub use client::{Bridge, ClientError, ConnectorClient};
pub use config::{CONFIG_DIR, ConnectorConfig, NSENTER_PREFIX};
pub use daemon::Connector;
pub use error::{ConfigError, Error, Result};
pub use exec::{CommandRunner, ExecError, ShellRunner};
pub use listener::{Listener, StreamListener};
pub use protocol::{MAX_FRAME_SIZE, Reply};
