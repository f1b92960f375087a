//! Error types for the connector.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use crate::client::ClientError;
pub use crate::exec::ExecError;
pub use crate::protocol::ProtocolError;

pub type Result<T> = std::result::Result<T, Error>;

/// Daemon-side errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to daemonize: {0}")]
    Daemonize(String),

    #[error("failed to prepare socket {path}: {source}")]
    Socket {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(io::Error),

    #[error("failed to parse config: {0}")]
    ParseError(String),

    #[error("invalid configuration: {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_error_names_path() {
        let err = Error::Socket {
            path: PathBuf::from("/etc/open-object/connector.sock"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().contains("/etc/open-object/connector.sock"));
    }
}
