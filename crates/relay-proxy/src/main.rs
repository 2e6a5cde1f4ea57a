//! stream-proxy: byte-level TCP relay.
//!
//! Forwards every accepted connection to one fixed target without looking
//! at the bytes, keeping aggregate transfer statistics.

mod config;
mod proxy;

use clap::Parser;
use config::{resolve_target, ProxyConfig, TARGET_ENV};
use proxy::StreamProxy;
use tracing::{error, info};

/// stream-proxy: forward TCP connections to a remote compute node
#[derive(Parser, Debug)]
#[command(name = "stream-proxy", version, about = "Byte-level TCP stream proxy")]
struct Cli {
    /// Address to listen on (`:port` binds all interfaces)
    #[arg(long, default_value = ":5555")]
    listen: String,

    /// Target address every connection is forwarded to
    /// (RELAY_PROXY_TARGET overrides it when set)
    #[arg(long)]
    target: Option<String>,

    /// Dial timeout towards the target, in seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Copy buffer size in bytes, per direction
    #[arg(long, default_value_t = 32 * 1024)]
    buffer: usize,

    /// Seconds between stats log lines (0 disables)
    #[arg(long, default_value_t = 30)]
    stats_interval: u64,

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

    let target = resolve_target(cli.target, std::env::var(TARGET_ENV).ok()).unwrap_or_default();
    let config = match ProxyConfig::new(
        &cli.listen,
        &target,
        cli.timeout,
        cli.buffer,
        cli.stats_interval,
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listen,
        target = %config.target,
        "starting stream-proxy"
    );

    let proxy = match StreamProxy::bind(config).await {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "failed to listen");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("received shutdown signal");
        let _ = shutdown_tx.send(());
    });

    if let Err(e) = proxy.run(shutdown_rx).await {
        error!(error = %e, "proxy error");
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
