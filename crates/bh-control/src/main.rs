//! backhaul control plane daemon
//!
//! Accepts control transports and reply streams from workers and exposes
//! workers on local ports.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bh_control::{ControlServer, Forwarder, Registry};
use bh_core::config::{self, ControlConfig, ExposeRule};

#[derive(Parser)]
#[command(name = "bh-control")]
#[command(about = "backhaul control plane daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address for worker connections (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Expose a worker on a local address, as WORKER=ADDR (repeatable)
    #[arg(short, long = "expose", value_name = "WORKER=ADDR")]
    expose: Vec<ExposeRule>,

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

    tracing::info!("backhaul control plane starting...");

    let mut config = load_config(args.config.as_ref())?;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    config.expose.extend(args.expose);

    let registry = Registry::new(config.registry.clone());
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    for rule in &config.expose {
        let forwarder = Forwarder::bind(registry.clone(), rule)
            .await
            .with_context(|| format!("Failed to bind {} for worker {}", rule.listen, rule.worker_id))?;
        tokio::spawn(forwarder.run(cancel.clone()));
    }

    let server = ControlServer::new(registry.clone(), cancel.clone());
    server
        .run(&config.bind_address)
        .await
        .with_context(|| format!("Control server on {} failed", config.bind_address))?;

    registry.shutdown();
    tracing::info!("Control plane shutdown complete");
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<ControlConfig> {
    if let Some(path) = path {
        return config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path));
    }

    let default_path = config::default_config_path("control");
    if default_path.exists() {
        Ok(config::load_config(&default_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
            ControlConfig::default()
        }))
    } else {
        tracing::info!("Using default configuration");
        Ok(ControlConfig::default())
    }
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel.cancel();
    });
}
