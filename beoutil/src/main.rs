mod cache;
mod client;
mod commands;
mod config;
mod mdns;
mod notify;
mod topology;

use std::path::PathBuf;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::config::Config;

/// Control B&O products via the beoremote API
#[derive(Debug, Parser)]
#[command(name = "beoutil", version)]
struct Args {
    /// Configuration file; defaults to ~/.config/beoutil/config.toml when present
    #[arg(long, global = true, env = "BEOUTIL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Discover products using mDNS
    FindProducts {
        /// Browse window in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// List discovered products
    ListProducts,
    /// Watch a product's notifications
    Watch {
        /// Product address
        address: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log.filter))
        )
        .init();

    // Interrupt cancels whatever command is running
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Interrupt received");
                signal_cancel.cancel();
            }
            Err(e) => tracing::error!("Failed to listen for ctrl-c: {}", e),
        }
    });

    match args.command {
        Command::FindProducts { timeout } => commands::find_products(&config, timeout, &cancel).await,
        Command::ListProducts => commands::list_products(&config, &cancel).await,
        Command::Watch { address } => commands::watch(&config, &address, &cancel).await,
    }
}
