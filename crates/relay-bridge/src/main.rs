//! relay-bridge: WebSocket front end for a framed TCP backend.
//!
//! Accepts JSON envelopes from browsers and edge devices, authenticates each
//! client, and relays its traffic to the backend's binary framed protocol.

mod auth;
mod config;
mod server;
mod session;
mod throttle;
mod websocket;

use std::path::PathBuf;

use auth::ConfiguredAuthenticator;
use clap::Parser;
use config::{BridgeConfig, Overrides};
use server::BridgeServer;
use tracing::{error, info};

/// relay-bridge: JSON-over-WebSocket to framed-TCP bridge
#[derive(Parser, Debug)]
#[command(name = "relay-bridge", version, about = "WebSocket to backend bridge")]
struct Cli {
    /// Front listen address (host:port)
    #[arg(long)]
    listen: Option<String>,

    /// Backend address (host:port)
    #[arg(long)]
    backend: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.relay/bridge.toml")]
    config: String,

    /// Idle timeout for front connections in seconds (0 disables)
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting relay-bridge");

    let config_path = PathBuf::from(&cli.config);
    let config = match BridgeConfig::load(
        Some(&config_path),
        Overrides {
            listen: cli.listen,
            backend: cli.backend,
            idle_timeout_secs: cli.idle_timeout,
        },
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let authenticator = match ConfiguredAuthenticator::from_config(&config) {
        Ok(a) => a,
        Err(e) => {
            error!(error = %e, "failed to set up authentication");
            std::process::exit(1);
        }
    };

    let server = match BridgeServer::bind(&config, authenticator).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to listen");
            std::process::exit(1);
        }
    };
    info!(backend = %config.backend, "forwarding to backend");

    let shutdown_tx = server.shutdown_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("received shutdown signal");
        let _ = shutdown_tx.send(());
    });

    if let Err(e) = server.run().await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
