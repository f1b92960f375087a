//! openobject-csi: CSI driver for object-store-backed volumes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use openobject_csi::driver::{
    DEFAULT_CONNECTOR_SOCKET, DEFAULT_DATA_DIR, DEFAULT_ENDPOINT, DEFAULT_HOST_ROOT,
};
use openobject_csi::{Config, Driver, FeatureGates};

#[derive(Parser, Debug)]
#[command(name = "openobject-csi")]
#[command(about = "CSI driver for object-store-backed volumes")]
struct Args {
    /// CSI endpoint (unix:// or tcp://).
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Node ID.
    #[arg(long)]
    node_id: Option<String>,

    /// Data directory for volume records and node-local publish records.
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Connector daemon socket, as seen from this process.
    #[arg(long, default_value = DEFAULT_CONNECTOR_SOCKET)]
    connector_socket: PathBuf,

    /// Where the host root filesystem is mounted.
    #[arg(long, default_value = DEFAULT_HOST_ROOT)]
    host_root: PathBuf,

    /// Comma-separated feature gates, e.g. Quota=true.
    #[arg(long, default_value = "")]
    feature_gates: String,

    /// Directory of secret files (one file per key) used by node RPCs that
    /// carry no credentials.
    #[arg(long)]
    node_secrets_dir: Option<PathBuf>,

    /// Verbosity level (0-4).
    #[arg(short, default_value = "0")]
    v: u8,
}

/// Read a mounted secret volume: each regular file is one key.
fn load_secrets(dir: &Path) -> anyhow::Result<HashMap<String, String>> {
    let mut secrets = HashMap::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        // Kubernetes projects secrets through hidden ..data symlinks.
        if name.starts_with('.') || !entry.path().is_file() {
            continue;
        }
        let value = std::fs::read_to_string(entry.path())
            .with_context(|| format!("reading secret {name}"))?;
        secrets.insert(name, value.trim().to_string());
    }
    Ok(secrets)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Use targeted filters to avoid verbose logs from dependencies (h2, tonic, hyper).
    let filter = match args.v {
        0 => "warn".to_string(),
        1 => "openobject_csi=info,openobject_connector=info,warn".to_string(),
        2 => "openobject_csi=debug,openobject_connector=debug,warn".to_string(),
        3 => "openobject_csi=trace,openobject_connector=trace,warn".to_string(),
        _ => "openobject_csi=trace,openobject_connector=trace,info".to_string(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let features = FeatureGates::parse(&args.feature_gates).context("invalid --feature-gates")?;
    let node_secrets = match &args.node_secrets_dir {
        Some(dir) => load_secrets(dir)?,
        None => HashMap::new(),
    };

    let defaults = Config::default();
    let config = Config {
        endpoint: args.endpoint,
        node_id: args.node_id.unwrap_or(defaults.node_id.clone()),
        data_dir: args.data_dir,
        connector_socket: args.connector_socket,
        host_root: args.host_root,
        features,
        node_secrets,
        ..defaults
    };

    info!(
        name = %config.name,
        version = %config.version,
        node_id = %config.node_id,
        endpoint = %config.endpoint,
        node_secrets = config.node_secrets.len(),
        "starting openobject CSI driver"
    );

    let driver = Driver::new(config).context("failed to initialise driver")?;
    driver.run().await?;

    Ok(())
}
