//! Connector daemon: accepts bridge connections and runs their commands.
//!
//! Lifecycle: [`daemonize`] (before any runtime exists), [`bind_socket`],
//! [`Connector::serve`] until the cancellation token fires, then [`release`].
//!
//! ```ignore
//! let listener = bind_socket(&config.socket)?;
//! let connector = Connector::new(Arc::new(ShellRunner::default()), config.shutdown_grace());
//! connector.serve(listener, shutdown.clone()).await?;
//! release(&config);
//! ```

use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use daemonize::Daemonize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ConnectorConfig;
use crate::error::{Error, Result};
use crate::exec::CommandRunner;
use crate::listener::Listener;
use crate::protocol::{MAX_FRAME_SIZE, Reply};

/// Pause after a failed accept so a persistent error (e.g. EMFILE) does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

const PID_FILE_MODE: u32 = 0o644;
const LOG_FILE_MODE: u32 = 0o640;

/// Detach from the terminal, write the PID file and redirect stdout/stderr
/// into the log file.
///
/// Must run before the async runtime is built: forking a process that
/// already owns runtime threads leaves the child without them.
pub fn daemonize(config: &ConnectorConfig) -> Result<()> {
    for path in [&config.pid_file, &config.log_file] {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
    }

    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(LOG_FILE_MODE)
        .open(&config.log_file)?;
    let log_err = log.try_clone()?;

    Daemonize::new()
        .pid_file(&config.pid_file)
        .chown_pid_file(true)
        .working_directory(&config.work_dir)
        .umask(config.umask)
        .stdout(log)
        .stderr(log_err)
        .start()
        .map_err(|e| Error::Daemonize(e.to_string()))?;

    set_pid_file_mode(&config.pid_file);
    Ok(())
}

fn set_pid_file_mode(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    log_cleanup_error("set pid file mode", || {
        fs::set_permissions(path, fs::Permissions::from_mode(PID_FILE_MODE))
    });
}

/// Bind the daemon socket, removing a stale socket file left by a previous
/// instance or creating the parent directory on first start.
///
/// Assumes at most one live daemon per node.
pub fn bind_socket(path: &Path) -> Result<UnixListener> {
    let socket_err = |source: io::Error| Error::Socket {
        path: path.to_path_buf(),
        source,
    };

    if path.exists() {
        fs::remove_file(path).map_err(socket_err)?;
        debug!(socket = %path.display(), "removed stale socket");
    } else if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(socket_err)?;
    }

    let listener = UnixListener::bind(path).map_err(socket_err)?;
    info!(socket = %path.display(), "socket ready");
    Ok(listener)
}

/// Remove the PID file and socket on stop.
pub fn release(config: &ConnectorConfig) {
    for (what, path) in [("pid file", &config.pid_file), ("socket", &config.socket)] {
        if path.exists() {
            log_cleanup_error(what, || fs::remove_file(path));
        }
    }
    info!("connector released");
}

fn log_cleanup_error<F, E>(operation: &str, f: F)
where
    F: FnOnce() -> std::result::Result<(), E>,
    E: std::fmt::Display,
{
    if let Err(e) = f() {
        warn!(operation, error = %e, "cleanup failed");
    }
}

/// Serves one command per connection.
#[derive(Clone)]
pub struct Connector {
    runner: Arc<dyn CommandRunner>,
    grace: Duration,
}

impl Connector {
    pub fn new(runner: Arc<dyn CommandRunner>, grace: Duration) -> Self {
        Self { runner, grace }
    }

    /// Accept connections until `shutdown` is cancelled or the listener is
    /// exhausted.
    ///
    /// Each connection runs on its own task. A failed accept only drops that
    /// attempt. On shutdown, in-flight connections get the grace period to
    /// finish and are aborted after it; the processes they started are not
    /// killed.
    pub async fn serve<L>(&self, mut listener: L, shutdown: CancellationToken) -> Result<()>
    where
        L: Listener,
    {
        info!("connector serving");
        let mut workers = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("stop requested");
                    break;
                }
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(e) = joined
                        && e.is_panic()
                    {
                        error!(error = %e, "connection task panicked");
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok(stream) => {
                        let runner = Arc::clone(&self.runner);
                        workers.spawn(async move {
                            if let Err(e) = handle_connection(runner.as_ref(), stream).await {
                                warn!(error = %e, "connection error");
                            }
                        });
                    }
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                        debug!("listener exhausted");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        self.drain(workers).await;
        Ok(())
    }

    async fn drain(&self, mut workers: JoinSet<()>) {
        if workers.is_empty() {
            return;
        }
        info!(in_flight = workers.len(), grace = ?self.grace, "waiting for in-flight commands");

        let drained = tokio::time::timeout(self.grace, async {
            while workers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = workers.len(),
                "grace period elapsed, abandoning in-flight connections"
            );
            workers.shutdown().await;
        }
    }
}

/// Read one command frame, run it, write one reply frame, close.
async fn handle_connection<S>(runner: &dyn CommandRunner, mut stream: S) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; MAX_FRAME_SIZE];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        debug!("client closed before sending a command");
        return Ok(());
    }

    let command = String::from_utf8_lossy(&buf[..n]).into_owned();
    info!(command = %command, "received command");

    let reply = match runner.run(&command).await {
        Ok(stdout) => Reply::success(stdout),
        Err(e) => Reply::failure(&command, e),
    };
    match &reply {
        Reply::Success(_) => info!(command = %command, "command succeeded"),
        Reply::Failure(text) => warn!(reply = %text, "command failed"),
    }

    stream.write_all(&reply.encode()).await?;
    stream.shutdown().await
}
