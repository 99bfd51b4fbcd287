//! backhaul worker agent
//!
//! Keeps a control transport open to the control plane and forwards every
//! reverse-dialed stream to a local service.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bh_agent::{forward_to, AgentSession, TcpConnector};
use bh_core::config::{self, AgentConfig};

#[derive(Parser)]
#[command(name = "bh-agent")]
#[command(about = "backhaul agent - makes a local service reachable through the control plane")]
#[command(version)]
struct Args {
    /// Control plane address (host:port)
    #[arg(short, long)]
    server: Option<String>,

    /// Worker id (defaults to hostname)
    #[arg(short, long)]
    worker_id: Option<String>,

    /// Local service to forward streams to (host:port)
    #[arg(short, long)]
    forward_to: Option<String>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("backhaul agent starting...");

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config::default_config_path("agent"));

    let mut config = if config_path.exists() {
        config::load_config(&config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        AgentConfig::default()
    };

    if let Some(server) = args.server {
        config.server_address = server;
    }
    if let Some(worker_id) = args.worker_id {
        config.worker_id = Some(worker_id);
    }
    if let Some(target) = args.forward_to {
        config.forward_to = target;
    }

    tracing::info!(
        "Worker {} connecting to {}, forwarding to {}",
        config.worker_id(),
        config.server_address,
        config.forward_to
    );

    let connector = Arc::new(TcpConnector::new(
        config.server_address.clone(),
        config.connect_timeout,
    ));
    let target: Arc<str> = Arc::from(config.forward_to.as_str());
    let session = AgentSession::new(config, connector);

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        cancel_clone.cancel();
    });

    session
        .run_with_reconnect(cancel, move |stream| {
            let target = Arc::clone(&target);
            async move {
                if let Err(e) = forward_to(stream, &target).await {
                    tracing::warn!("Forwarding to {} failed: {}", target, e);
                }
            }
        })
        .await
        .context("Agent stopped")?;

    tracing::info!("Agent shutdown complete");
    Ok(())
}
