//! cmdlink service binary.
//!
//! Loads a manager configuration, brings up every link and device, reports
//! what was found, and runs until Ctrl-C.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cmdlink::{CmdLinkError, CommandManager, Result};

#[derive(Parser, Debug)]
#[command(name = "cmdlink", about = "Command microcontroller peripherals over serial or sockets")]
struct Args {
    /// Path to the manager configuration file (YAML or JSON)
    #[arg(short, long, env = "CMDLINK_CONFIG", default_value = "config/cmdlink.yaml")]
    config: PathBuf,

    /// Bring everything up, report discovered devices, then exit
    #[arg(long)]
    scan: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!(config = %args.config.display(), "starting cmdlink");

    let manager = CommandManager::from_config_file(&args.config).await?;

    let mut devices = manager.device_names();
    devices.sort();
    info!(links = manager.sessions().len(), devices = ?devices, "command link up");

    if args.scan {
        manager.stop().await;
        return Ok(());
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| CmdLinkError::state(format!("failed to wait for shutdown signal: {e}")))?;
    info!("shutting down");
    manager.stop().await;
    Ok(())
}
