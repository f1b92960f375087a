//! Client side of the mount bridge.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

use crate::protocol::{self, MAX_FRAME_SIZE, ProtocolError, Reply};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to connector at {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("connector i/o error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("connector exec command error: {reply}")]
    Rejected { reply: String },
}

/// Something that can run a command on the host and return its stdout.
#[async_trait]
pub trait Bridge: Send + Sync {
    async fn exec(&self, command: &str) -> Result<String, ClientError>;
}

/// Talks to the connector daemon over its Unix socket.
///
/// Every command opens a fresh connection. There is no retry; the caller
/// decides whether a command is safe to repeat.
#[derive(Debug, Clone)]
pub struct ConnectorClient {
    socket: PathBuf,
}

impl ConnectorClient {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Send one command and return the raw reply.
    pub async fn request(&self, command: &str) -> Result<Reply, ClientError> {
        let frame = protocol::encode_command(command)?;

        let mut stream =
            UnixStream::connect(&self.socket)
                .await
                .map_err(|source| ClientError::Connect {
                    path: self.socket.clone(),
                    source,
                })?;
        stream.write_all(frame).await?;

        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        let mut filled = 0;
        while filled < buf.len() {
            let n = stream.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        Ok(Reply::parse(&buf[..filled]))
    }
}

#[async_trait]
impl Bridge for ConnectorClient {
    async fn exec(&self, command: &str) -> Result<String, ClientError> {
        debug!(command, socket = %self.socket.display(), "bridge exec");
        match self.request(command).await? {
            Reply::Success(stdout) => Ok(stdout),
            Reply::Failure(reply) => Err(ClientError::Rejected { reply }),
        }
    }
}
