//! Connection sources for the connector daemon.
//!
//! The daemon serves a Unix socket in production. Tests feed it in-memory
//! duplex streams through [`StreamListener`].

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

/// Trait for accepting incoming bridge connections.
#[async_trait]
pub trait Listener: Send {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Accept the next incoming connection.
    async fn accept(&mut self) -> std::io::Result<Self::Stream>;
}

#[async_trait]
impl Listener for UnixListener {
    type Stream = UnixStream;

    async fn accept(&mut self) -> std::io::Result<Self::Stream> {
        UnixListener::accept(self)
            .await
            .map(|(stream, _addr)| stream)
    }
}

/// A listener that accepts streams from a channel.
///
/// Dropping every sender ends the accept loop with `BrokenPipe`.
pub struct StreamListener<S> {
    rx: mpsc::Receiver<std::io::Result<S>>,
}

impl<S> StreamListener<S> {
    /// Create a new stream listener with the given buffer capacity.
    ///
    /// Returns the sender half for pushing streams (or injected accept
    /// errors) and the listener.
    pub fn new(buffer: usize) -> (mpsc::Sender<std::io::Result<S>>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self { rx })
    }
}

#[async_trait]
impl<S> Listener for StreamListener<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Stream = S;

    async fn accept(&mut self) -> std::io::Result<Self::Stream> {
        match self.rx.recv().await {
            Some(next) => next,
            None => Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "channel closed",
            )),
        }
    }
}
