//! Bridge server: accepts front connections and runs one session per client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use relay_core::{
    spawn_reporter, tune_stream, ConnectionStats, RelayError, RelayResult, TagTable,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::auth::Authenticator;
use crate::config::BridgeConfig;
use crate::session::BridgeSession;
use crate::throttle::AuthThrottle;
use crate::websocket;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// State shared by every session of one server.
pub struct Shared<A> {
    pub(crate) authenticator: A,
    pub(crate) tags: Arc<TagTable>,
    pub(crate) throttle: Mutex<AuthThrottle>,
    pub(crate) max_frame_size: usize,
    pub(crate) max_message_size: usize,
    pub(crate) idle_timeout: Option<Duration>,
    pub(crate) stats: Arc<ConnectionStats>,
    pub(crate) shutdown_tx: broadcast::Sender<()>,
}

pub struct BridgeServer<A> {
    listener: TcpListener,
    stats_interval: Duration,
    shared: Arc<Shared<A>>,
}

impl<A: Authenticator> BridgeServer<A> {
    /// Bind the front listener.
    pub async fn bind(config: &BridgeConfig, authenticator: A) -> RelayResult<Self> {
        let listener = TcpListener::bind(&config.listen)
            .await
            .map_err(|e| RelayError::Transport(format!("bind {} failed: {e}", config.listen)))?;

        let shared = Shared {
            authenticator,
            tags: Arc::new(config.tags.clone()),
            throttle: Mutex::new(AuthThrottle::new(
                config.auth.max_attempts,
                config.auth.window_secs,
            )),
            max_frame_size: config.max_frame_size,
            max_message_size: config.max_message_size,
            idle_timeout: config.idle_timeout,
            stats: ConnectionStats::new(),
            shutdown_tx: broadcast::channel(1).0,
        };

        Ok(Self {
            listener,
            stats_interval: config.stats_interval,
            shared: Arc::new(shared),
        })
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> RelayResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    #[cfg(test)]
    pub fn stats(&self) -> Arc<ConnectionStats> {
        self.shared.stats.clone()
    }

    /// Sending on this stops the accept loop and tells every live session
    /// to close.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shared.shutdown_tx.clone()
    }

    /// Accept until shutdown, then wait for the sessions to wind down.
    pub async fn run(self) -> RelayResult<()> {
        let Self {
            listener,
            stats_interval,
            shared,
        } = self;

        info!(addr = %listener.local_addr()?, "bridge listening");
        let reporter = spawn_reporter(shared.stats.clone(), stats_interval, "bridge");
        let mut shutdown = shared.shutdown_tx.subscribe();
        let mut gc = tokio::time::interval(Duration::from_secs(60));
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,

                _ = gc.tick() => shared.throttle.lock().await.gc(),

                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        // Subscribe before spawning so a session still in its
                        // handshake cannot miss the shutdown notice.
                        let session_shutdown = shared.shutdown_tx.subscribe();
                        sessions.spawn(serve_connection(
                            stream,
                            remote,
                            shared.clone(),
                            session_shutdown,
                        ));
                    }
                    Err(e) => error!(error = %e, "TCP accept failed"),
                },
            }
            while sessions.try_join_next().is_some() {}
        }

        drop(listener);
        info!(active = shared.stats.snapshot().active, "shutting down, closing sessions");
        while sessions.join_next().await.is_some() {}
        if let Some(reporter) = reporter {
            reporter.abort();
        }
        info!("bridge stopped");
        Ok(())
    }
}

async fn serve_connection<A: Authenticator>(
    stream: TcpStream,
    remote: SocketAddr,
    shared: Arc<Shared<A>>,
    shutdown: broadcast::Receiver<()>,
) {
    if let Err(e) = tune_stream(&stream) {
        debug!(remote = %remote, error = %e, "could not tune socket");
    }
    let handshake = websocket::accept(stream, shared.max_message_size);
    let ws = match tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            warn!(remote = %remote, error = %e, "WebSocket handshake failed");
            return;
        }
        Err(_) => {
            warn!(remote = %remote, "WebSocket handshake timed out");
            return;
        }
    };
    BridgeSession::run(ws, remote, shared, shutdown).await;
}
