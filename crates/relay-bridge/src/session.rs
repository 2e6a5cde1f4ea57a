//! One bridged client: a front WebSocket paired with a backend TCP stream.
//!
//! The front reader (this task) is the only place the auth state changes.
//! The back reader is spawned only once the session is authenticated and
//! owns the backend's read half; the write half lives in [`AuthState`].
//! Both readers feed a single writer task, so the client sees envelopes in
//! the order they were produced.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use rand::Rng;
use relay_core::{
    write_frame, ClientEnvelope, FrameReader, Identity, RelayError, ServerEnvelope, TagTable,
};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::auth::{AuthOutcome, Authenticator};
use crate::server::Shared;
use crate::websocket::{envelope_message, spawn_writer, FrontStream};

/// Sent to every live session when the bridge shuts down.
pub const SHUTDOWN_MESSAGE: &str = "server shutting down";

/// Sent instead of an auth verdict when an IP has failed too often.
pub const THROTTLED_MESSAGE: &str = "too many failed authentication attempts";

/// A session is authenticated exactly when it holds a backend connection.
enum AuthState {
    Unauthenticated,
    Authenticated {
        identity: Identity,
        backend: OwnedWriteHalf,
    },
    Rejected,
}

/// What the front loop does after handling one message.
enum Flow {
    Continue,
    Close,
}

pub struct BridgeSession<A> {
    id: String,
    remote: SocketAddr,
    shared: Arc<Shared<A>>,
    state: AuthState,
    out: mpsc::Sender<Message>,
    back_task: Option<JoinHandle<()>>,
    /// Front bytes received; backend bytes are counted by the back reader.
    front_bytes: u64,
    backend_bytes: Arc<AtomicU64>,
}

impl<A: Authenticator> BridgeSession<A> {
    /// Drive one front connection until either side closes.
    pub async fn run(
        ws: FrontStream,
        remote: SocketAddr,
        shared: Arc<Shared<A>>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let guard = shared.stats.open();
        let (sink, mut stream) = ws.split();
        let (out, writer) = spawn_writer(sink);

        let mut session = Self {
            id: generate_session_id(),
            remote,
            shared,
            state: AuthState::Unauthenticated,
            out,
            back_task: None,
            front_bytes: 0,
            backend_bytes: Arc::new(AtomicU64::new(0)),
        };
        info!(session_id = %session.id, remote = %remote, conn = guard.id(), "session opened");

        let idle = session.shared.idle_timeout;
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    session.send(ServerEnvelope::error(SHUTDOWN_MESSAGE)).await;
                    break;
                }

                _ = back_finished(&mut session.back_task) => {
                    session.back_task = None;
                    info!(session_id = %session.id, "backend closed the connection");
                    session.send(ServerEnvelope::error("backend connection closed")).await;
                    break;
                }

                next = next_message(&mut stream, idle) => {
                    let msg = match next {
                        Ok(Some(Ok(msg))) => msg,
                        Ok(Some(Err(e))) => {
                            debug!(session_id = %session.id, error = %e, "WS read failed");
                            break;
                        }
                        Ok(None) => break,
                        Err(()) => {
                            info!(session_id = %session.id, "idle timeout");
                            session.send(ServerEnvelope::error("idle timeout")).await;
                            break;
                        }
                    };
                    if let Flow::Close = session.on_message(msg).await {
                        break;
                    }
                }
            }
        }

        let _ = session.out.send(Message::Close(None)).await;
        let bytes = session.finish().await;
        drop(session);
        let _ = writer.await;

        guard.record_bytes(bytes);
        info!(remote = %remote, conn = guard.id(), bytes, "session closed");
    }

    async fn on_message(&mut self, msg: Message) -> Flow {
        let text = match msg {
            Message::Text(text) => text.to_string(),
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    return self
                        .protocol_error("binary messages must be UTF-8 JSON".into())
                        .await
                }
            },
            Message::Close(_) => return Flow::Close,
            // Pongs are queued by tungstenite and flushed on the next write.
            _ => return Flow::Continue,
        };
        self.front_bytes += text.len() as u64;

        match ClientEnvelope::parse(&text) {
            Ok(envelope) => self.on_envelope(envelope).await,
            Err(e) => self.protocol_error(e.to_string()).await,
        }
    }

    /// Report a bad message. Fatal only before authentication.
    async fn protocol_error(&mut self, message: String) -> Flow {
        warn!(session_id = %self.id, error = %message, "protocol error");
        self.send(ServerEnvelope::error(message)).await;
        match self.state {
            AuthState::Authenticated { .. } => Flow::Continue,
            _ => Flow::Close,
        }
    }

    async fn on_envelope(&mut self, envelope: ClientEnvelope) -> Flow {
        let authenticated = match self.state {
            AuthState::Unauthenticated => false,
            AuthState::Authenticated { .. } => true,
            AuthState::Rejected => return Flow::Close,
        };

        if !authenticated {
            if let ClientEnvelope::Auth { token } = envelope {
                return self.authenticate(token).await;
            }
            warn!(
                session_id = %self.id,
                kind = envelope.kind(),
                "message before authentication"
            );
            self.send(ServerEnvelope::error("authentication required"))
                .await;
            return Flow::Close;
        }

        if let ClientEnvelope::Auth { .. } = envelope {
            self.send(ServerEnvelope::error("already authenticated"))
                .await;
            return Flow::Continue;
        }

        let frame = match self.shared.tags.encode(&envelope) {
            Ok(frame) => frame,
            Err(e) => return self.protocol_error(e.to_string()).await,
        };
        debug!(
            session_id = %self.id,
            kind = envelope.kind(),
            len = frame.payload.len(),
            "front -> backend"
        );

        let AuthState::Authenticated { backend, .. } = &mut self.state else {
            return Flow::Close;
        };
        if let Err(e) = write_frame(backend, &frame).await {
            warn!(session_id = %self.id, error = %e, "backend write failed");
            self.send(ServerEnvelope::error("backend connection lost"))
                .await;
            return Flow::Close;
        }
        Flow::Continue
    }

    async fn authenticate(&mut self, token: String) -> Flow {
        if token.trim().is_empty() {
            return self.reject("missing token".into()).await;
        }

        let allowed = self.shared.throttle.lock().await.check(self.remote.ip());
        if !allowed {
            // Not a verdict on the token: the client may retry later.
            warn!(session_id = %self.id, remote = %self.remote, "auth rate limit exceeded");
            self.state = AuthState::Rejected;
            self.send(ServerEnvelope::error(THROTTLED_MESSAGE)).await;
            return Flow::Close;
        }

        match self.shared.authenticator.authenticate(&token).await {
            Ok(AuthOutcome::Accepted { identity, backend }) => {
                info!(
                    session_id = %self.id,
                    user_id = %identity.user_id,
                    username = %identity.username,
                    "authenticated"
                );
                // Queue the verdict before any backend traffic can follow it.
                self.send(ServerEnvelope::auth_ok(&identity)).await;
                let (read, write) = backend.into_split();
                self.back_task = Some(tokio::spawn(pump_backend(
                    read,
                    self.shared.tags.clone(),
                    self.shared.max_frame_size,
                    self.out.clone(),
                    self.backend_bytes.clone(),
                    self.id.clone(),
                )));
                self.state = AuthState::Authenticated {
                    identity,
                    backend: write,
                };
                Flow::Continue
            }
            Ok(AuthOutcome::Rejected(message)) => self.reject(message).await,
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "backend unavailable");
                self.state = AuthState::Rejected;
                let message = match e {
                    RelayError::BackendUnavailable(_) => e.to_string(),
                    other => format!("backend unavailable: {other}"),
                };
                self.send(ServerEnvelope::error(message)).await;
                Flow::Close
            }
        }
    }

    async fn reject(&mut self, message: String) -> Flow {
        info!(session_id = %self.id, reason = %message, "authentication rejected");
        self.shared
            .throttle
            .lock()
            .await
            .record_failure(self.remote.ip());
        self.state = AuthState::Rejected;
        self.send(ServerEnvelope::auth_rejected(message)).await;
        Flow::Close
    }

    async fn send(&self, envelope: ServerEnvelope) {
        match envelope_message(&envelope) {
            Ok(msg) => {
                let _ = self.out.send(msg).await;
            }
            Err(e) => warn!(session_id = %self.id, error = %e, "failed to encode envelope"),
        }
    }

    /// Stop the back reader and return the total bytes relayed both ways.
    async fn finish(&mut self) -> u64 {
        if let Some(task) = self.back_task.take() {
            task.abort();
            let _ = task.await;
        }
        if let AuthState::Authenticated { identity, .. } = &self.state {
            debug!(session_id = %self.id, username = %identity.username, "releasing backend");
        }
        self.front_bytes + self.backend_bytes.load(Ordering::Relaxed)
    }
}

/// Read the next front message, bounded by the idle timeout if one is set.
async fn next_message(
    stream: &mut futures_util::stream::SplitStream<FrontStream>,
    idle: Option<Duration>,
) -> Result<Option<Result<Message, tokio_tungstenite::tungstenite::Error>>, ()> {
    match idle {
        Some(limit) => tokio::time::timeout(limit, stream.next())
            .await
            .map_err(|_| ()),
        None => Ok(stream.next().await),
    }
}

/// Resolves when the back reader exits; pending forever if there is none.
async fn back_finished(task: &mut Option<JoinHandle<()>>) {
    match task {
        Some(handle) => {
            let _ = handle.await;
        }
        None => std::future::pending().await,
    }
}

/// Translate backend frames into envelopes until the backend goes away,
/// adding every frame read to `bytes`.
async fn pump_backend(
    read: OwnedReadHalf,
    tags: Arc<TagTable>,
    max_frame_size: usize,
    out: mpsc::Sender<Message>,
    bytes: Arc<AtomicU64>,
    session_id: String,
) {
    let mut reader = FrameReader::new(read, max_frame_size);
    loop {
        let frame = match reader.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "backend read failed");
                break;
            }
        };
        bytes.fetch_add(frame.wire_len() as u64, Ordering::Relaxed);

        let envelope = match tags.decode(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "untranslatable backend frame");
                ServerEnvelope::error(format!("invalid backend message: {e}"))
            }
        };
        debug!(session_id = %session_id, kind = envelope.kind(), "backend -> front");
        let msg = match envelope_message(&envelope) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "failed to encode envelope");
                continue;
            }
        };
        if out.send(msg).await.is_err() {
            break;
        }
    }
}

fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}
