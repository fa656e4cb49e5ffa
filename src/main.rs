//! # pointrelay
//!
//! Relay point-cloud frames from a local UDP producer to WebSocket subscribers.
//!
//! ```bash
//! # Run with defaults (udp 127.0.0.1:14701, ws 127.0.0.1:9000, binary frames)
//! pointrelay
//!
//! # Run with a configuration file and the legacy text format
//! pointrelay --config relay.yaml --format text
//!
//! # More logging
//! RUST_LOG=pointrelay=debug pointrelay
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pointrelay::{RelayConfig, RelayController, RelayState, WireFormat};

/// Point-cloud telemetry relay
#[derive(Parser, Debug)]
#[command(name = "pointrelay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the UDP ingest address
    #[arg(long, value_name = "ADDR")]
    udp: Option<SocketAddr>,

    /// Override the WebSocket listen address (must be loopback)
    #[arg(long, value_name = "ADDR")]
    ws: Option<SocketAddr>,

    /// Override the subscriber payload format (binary or text)
    #[arg(long)]
    format: Option<WireFormat>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pointrelay=info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    if args.validate {
        println!("Configuration is valid");
        return Ok(());
    }

    run(config).await
}

/// Load the configuration file (if any) and apply command-line overrides
fn load_config(args: &Args) -> Result<RelayConfig> {
    let mut config = match &args.config {
        Some(path) => RelayConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => RelayConfig::default(),
    };

    if let Some(udp) = args.udp {
        config.udp.bind = udp;
    }
    if let Some(ws) = args.ws {
        config.websocket.bind = ws;
    }
    if let Some(format) = args.format {
        config.wire_format = format;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn run(config: RelayConfig) -> Result<()> {
    let controller = RelayController::new(config);
    let endpoints = controller.start().await.context("Failed to start relay")?;
    info!(
        "Relaying udp://{} to ws://{} ({} frames)",
        endpoints.udp,
        endpoints.websocket,
        controller.config().wire_format
    );

    let mut states = controller.state_updates();
    let failed = async {
        while let Some(state) = states.next().await {
            if state == RelayState::Failed {
                return;
            }
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Interrupt received, stopping"),
                Err(e) => warn!(error = %e, "Failed to listen for interrupt, stopping"),
            }
        }
        () = failed => error!("Relay failed, stopping"),
    }

    let stopped = controller.stop().await;
    let stats = controller.stats();
    info!(
        datagrams = stats.datagrams,
        relayed = stats.relayed,
        dropped = stats.dropped(),
        receive_errors = stats.receive_errors,
        "Relay stopped"
    );
    stopped.context("Relay stopped with an error")
}
