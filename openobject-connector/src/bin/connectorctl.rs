//! connectorctl - send a single command through the connector daemon.
//!
//! Usage:
//!   connectorctl exec -- mount -t fuse.s3fs
//!   connectorctl --socket /host/etc/open-object/connector.sock exec ls /var/lib/kubelet

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use openobject_connector::{ConnectorClient, Reply};

const DEFAULT_SOCKET_PATH: &str = "/etc/open-object/connector.sock";

#[derive(Parser)]
#[command(name = "connectorctl")]
#[command(about = "Run commands through the openobject connector")]
struct Cli {
    /// Connector socket path
    #[arg(short, long, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a command on the host
    Exec {
        /// Command words, joined with spaces
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = ConnectorClient::new(&cli.socket);

    match cli.command {
        Commands::Exec { args } => match client.request(&args.join(" ")).await? {
            Reply::Success(stdout) => print!("{stdout}"),
            Reply::Failure(reply) => {
                eprintln!("Error: {reply}");
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
