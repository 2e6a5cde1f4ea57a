//! The stream proxy: accept, dial the target, copy bytes both ways.
//!
//! Each accepted connection gets its own task. The two copy directions run
//! concurrently; when one direction's source ends it half-closes its
//! destination and the connection is torn down only after both finish.

use std::net::SocketAddr;
use std::sync::Arc;

use relay_core::{dial, spawn_reporter, tune_stream, ConnectionStats, RelayError, RelayResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::ProxyConfig;

pub struct StreamProxy {
    config: Arc<ProxyConfig>,
    listener: TcpListener,
    stats: Arc<ConnectionStats>,
}

impl StreamProxy {
    /// Bind the listen address. Failure here is fatal for the process.
    pub async fn bind(config: ProxyConfig) -> RelayResult<Self> {
        let listener = TcpListener::bind(&config.listen)
            .await
            .map_err(|e| RelayError::Transport(format!("bind {} failed: {e}", config.listen)))?;
        Ok(Self {
            config: Arc::new(config),
            listener,
            stats: ConnectionStats::new(),
        })
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> RelayResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    #[cfg(test)]
    pub fn stats(&self) -> Arc<ConnectionStats> {
        self.stats.clone()
    }

    /// Accept until `shutdown` fires, then stop accepting and wait for
    /// in-flight connections to finish on their own.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> RelayResult<()> {
        let Self {
            config,
            listener,
            stats,
        } = self;

        info!(
            listen = %listener.local_addr()?,
            target = %config.target,
            "proxy ready"
        );
        let reporter = spawn_reporter(stats.clone(), config.stats_interval, "proxy");

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok((client, remote)) => {
                        let config = config.clone();
                        let stats = stats.clone();
                        connections.spawn(handle_connection(client, remote, config, stats));
                    }
                    Err(e) => error!(error = %e, "accept failed"),
                },
            }
            while connections.try_join_next().is_some() {}
        }

        drop(listener);
        info!(active = stats.snapshot().active, "shutting down, draining connections");
        while connections.join_next().await.is_some() {}
        if let Some(reporter) = reporter {
            reporter.abort();
        }

        let snap = stats.snapshot();
        info!(total = snap.total, bytes = snap.bytes, "proxy stopped");
        Ok(())
    }
}

async fn handle_connection(
    client: TcpStream,
    remote: SocketAddr,
    config: Arc<ProxyConfig>,
    stats: Arc<ConnectionStats>,
) {
    let guard = stats.open();
    let conn_id = guard.id();
    info!(conn_id, remote = %remote, "new connection");

    let target = match dial(&config.target, config.dial_timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(conn_id, target = %config.target, error = %e, "failed to connect to target");
            return;
        }
    };
    if let Err(e) = tune_stream(&client) {
        debug!(conn_id, error = %e, "could not tune client socket");
    }
    debug!(conn_id, target = %config.target, "connected to target");

    let (client_read, client_write) = client.into_split();
    let (target_read, target_write) = target.into_split();

    let (bytes_in, bytes_out) = tokio::join!(
        pump(client_read, target_write, config.buffer_size),
        pump(target_read, client_write, config.buffer_size),
    );

    guard.record_bytes(bytes_in + bytes_out);
    info!(conn_id, bytes_in, bytes_out, "connection closed");
}

/// Copy `src` into `dst` until EOF or error, then half-close `dst`.
///
/// Returns the number of bytes written, also when the copy ended in error.
async fn pump<R, W>(mut src: R, mut dst: W, buffer_size: usize) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    let mut copied = 0u64;
    loop {
        let n = match src.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "read ended");
                break;
            }
        };
        if let Err(e) = dst.write_all(&buf[..n]).await {
            debug!(error = %e, "write ended");
            break;
        }
        copied += n as u64;
    }
    let _ = dst.shutdown().await;
    copied
}
