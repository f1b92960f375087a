//! openobject-connector daemon - runs mount commands on the host for the CSI node plugin.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use openobject_connector::daemon::{self, bind_socket};
use openobject_connector::{Connector, ConnectorConfig, NSENTER_PREFIX, ShellRunner};

#[derive(Parser)]
#[command(
    name = "openobject-connector",
    about = "Host-side command bridge for the openobject CSI driver"
)]
struct Cli {
    /// Path to config file. If omitted, uses defaults under /etc/open-object.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Socket path. Overrides config file if specified.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Run every command inside the host's PID 1 namespaces.
    #[arg(long)]
    nsenter: bool,

    /// Stay attached to the terminal instead of daemonizing.
    #[arg(long)]
    foreground: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = match cli.config {
        Some(ref path) => ConnectorConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => ConnectorConfig::default(),
    };

    if let Some(socket) = cli.socket {
        config.socket = socket;
    }
    if cli.nsenter {
        config.command_prefix = Some(NSENTER_PREFIX.to_string());
    }
    config.validate()?;

    if !cli.foreground {
        daemon::daemonize(&config).context("Unable to run connector")?;
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_ansi(cli.foreground)
        .init();

    info!(
        socket = %config.socket.display(),
        pid_file = %config.pid_file.display(),
        foreground = cli.foreground,
        "connector starting"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;
    let result = runtime.block_on(run(&config));

    daemon::release(&config);
    result
}

async fn run(config: &ConnectorConfig) -> Result<()> {
    let listener = bind_socket(&config.socket)?;

    let runner = Arc::new(ShellRunner::new(config.command_prefix.clone()));
    let connector = Connector::new(runner, config.shutdown_grace());
    let shutdown = CancellationToken::new();

    let serving = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { connector.serve(listener, shutdown).await }
    });

    wait_for_signal().await?;
    shutdown.cancel();

    serving.await.context("connector task failed")??;
    info!("connector stopped");
    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to register SIGTERM handler")?;
    tokio::select! {
        res = signal::ctrl_c() => {
            res.context("Failed to wait for Ctrl+C")?;
            info!("Received SIGINT");
        }
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }
    Ok(())
}
