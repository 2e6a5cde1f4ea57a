//! The reconnecting client driver.
//!
//! One background task owns the connection. It opens the WebSocket, sends
//! the `auth` envelope, translates everything it reads into events, and on
//! a drop schedules the next attempt with [`Backoff`]. Auth rejection and an
//! explicit permanent disconnect are terminal.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use relay_core::{ClientEnvelope, RelayError, RelayResult, ServerEnvelope, DEFAULT_MAX_FRAME_SIZE};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::events::{ClientEvent, EventBus, EventKind};

/// Configuration for a [`ReconnectingClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bridge URL, e.g. `ws://127.0.0.1:8765`.
    pub url: String,
    pub backoff: Backoff,
    /// Bound on opening the WebSocket (TCP connect + handshake).
    pub open_timeout: Duration,
    pub max_message_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8765".to_string(),
            backoff: Backoff::default(),
            open_timeout: Duration::from_secs(10),
            max_message_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Whether a dropped connection should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredState {
    ShouldReconnect,
    Terminal,
}

enum Outbound {
    Envelope(ClientEnvelope),
    Close,
}

/// How one connection ended.
enum ConnectionEnd {
    /// Dial failure or drop; the reconnect policy applies.
    Dropped,
    AuthFailed,
    /// A permanent disconnect arrived before the session started.
    Stopped,
}

struct SessionState {
    connection_attempts: u32,
    reconnect_delay: Duration,
    authenticated: bool,
    outbound: Option<mpsc::Sender<Outbound>>,
    driver: Option<JoinHandle<()>>,
}

struct Inner {
    config: ClientConfig,
    events: EventBus,
    state: Mutex<SessionState>,
    desired: watch::Sender<DesiredState>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_terminal(&self) -> bool {
        *self.desired.borrow() == DesiredState::Terminal
    }
}

/// Client side of a bridge session that survives network drops.
///
/// Cheap to clone; clones share the same connection and handlers.
#[derive(Clone)]
pub struct ReconnectingClient {
    inner: Arc<Inner>,
}

impl ReconnectingClient {
    pub fn new(config: ClientConfig) -> Self {
        let reconnect_delay = config.backoff.base;
        Self {
            inner: Arc::new(Inner {
                config,
                events: EventBus::new(),
                state: Mutex::new(SessionState {
                    connection_attempts: 0,
                    reconnect_delay,
                    authenticated: false,
                    outbound: None,
                    driver: None,
                }),
                desired: watch::channel(DesiredState::ShouldReconnect).0,
            }),
        }
    }

    /// Register a handler for one event kind.
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, handler);
    }

    /// Start connecting with `token`. Replaces any previous connection.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self, token: impl Into<String>) {
        let token = token.into();
        self.inner.desired.send_replace(DesiredState::ShouldReconnect);

        let mut state = self.inner.state();
        if let Some(old) = state.driver.take() {
            old.abort();
        }
        state.authenticated = false;
        state.outbound = None;
        state.driver = Some(tokio::spawn(drive(self.inner.clone(), token)));
    }

    /// Close the current connection.
    ///
    /// With `permanent` the client stops for good, including a pending
    /// reconnect wait. Otherwise this behaves like a network drop and the
    /// normal reconnect policy applies.
    pub fn disconnect(&self, permanent: bool) {
        if permanent {
            self.inner.desired.send_replace(DesiredState::Terminal);
        }
        let outbound = self.inner.state().outbound.clone();
        if let Some(tx) = outbound {
            let _ = tx.try_send(Outbound::Close);
        }
    }

    /// Wait until the driver has stopped (terminal state reached).
    pub async fn wait(&self) {
        let driver = self.inner.state().driver.take();
        if let Some(driver) = driver {
            let _ = driver.await;
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state().authenticated
    }

    pub fn connection_attempts(&self) -> u32 {
        self.inner.state().connection_attempts
    }

    pub fn reconnect_delay(&self) -> Duration {
        self.inner.state().reconnect_delay
    }

    pub fn desired_state(&self) -> DesiredState {
        *self.inner.desired.borrow()
    }

    pub async fn send_text(&self, message: impl Into<String>) -> RelayResult<()> {
        self.send(ClientEnvelope::Text {
            message: message.into(),
        })
        .await
    }

    /// Send raw audio; it is base64-encoded into the envelope.
    pub async fn send_audio(&self, audio: &[u8], format: &str, sample_rate: u32) -> RelayResult<()> {
        self.send(ClientEnvelope::Audio {
            data: BASE64.encode(audio),
            format: format.to_string(),
            sample_rate,
        })
        .await
    }

    pub async fn request_history(&self, offset: u64, limit: u64) -> RelayResult<()> {
        self.send(ClientEnvelope::HistoryRequest { offset, limit })
            .await
    }

    /// Queue an envelope on the live connection. Nothing is buffered across
    /// connections: this fails unless the session is authenticated.
    async fn send(&self, envelope: ClientEnvelope) -> RelayResult<()> {
        let tx = {
            let state = self.inner.state();
            if !state.authenticated {
                return Err(RelayError::NotReady("not authenticated".into()));
            }
            state
                .outbound
                .clone()
                .ok_or_else(|| RelayError::NotReady("not connected".into()))?
        };
        tx.send(Outbound::Envelope(envelope))
            .await
            .map_err(|_| RelayError::NotReady("connection closed".into()))
    }
}

/// Connection loop: runs until terminal.
async fn drive(inner: Arc<Inner>, token: String) {
    let mut desired = inner.desired.subscribe();
    loop {
        if inner.is_terminal() {
            break;
        }
        match run_connection(&inner, &token, &mut desired).await {
            ConnectionEnd::AuthFailed => {
                inner.desired.send_replace(DesiredState::Terminal);
                break;
            }
            ConnectionEnd::Stopped => break,
            ConnectionEnd::Dropped => {}
        }
        if inner.is_terminal() {
            break;
        }

        let (attempt, delay) = {
            let mut state = inner.state();
            state.connection_attempts = state.connection_attempts.saturating_add(1);
            state.reconnect_delay = inner.config.backoff.delay_for(state.connection_attempts);
            (state.connection_attempts, state.reconnect_delay)
        };
        info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
        inner
            .events
            .emit(&ClientEvent::Reconnecting { attempt, delay });

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = wait_terminal(&mut desired) => break,
        }
    }
    debug!("client driver stopped");
}

async fn wait_terminal(desired: &mut watch::Receiver<DesiredState>) {
    loop {
        if *desired.borrow_and_update() == DesiredState::Terminal {
            return;
        }
        if desired.changed().await.is_err() {
            return;
        }
    }
}

async fn run_connection(
    inner: &Arc<Inner>,
    token: &str,
    desired: &mut watch::Receiver<DesiredState>,
) -> ConnectionEnd {
    let config = &inner.config;
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_message_size);
    ws_config.max_frame_size = Some(config.max_message_size);

    let open = tokio_tungstenite::connect_async_with_config(
        config.url.as_str(),
        Some(ws_config),
        true,
    );
    let opened = tokio::select! {
        opened = tokio::time::timeout(config.open_timeout, open) => opened,
        _ = wait_terminal(desired) => {
            debug!(url = %config.url, "open abandoned, client stopped");
            return ConnectionEnd::Stopped;
        }
    };
    let mut ws = match opened {
        Ok(Ok((ws, _))) => ws,
        Ok(Err(e)) => {
            warn!(url = %config.url, error = %e, "connection failed");
            inner.events.emit(&ClientEvent::Error {
                message: format!("connection failed: {e}"),
            });
            return ConnectionEnd::Dropped;
        }
        Err(_) => {
            warn!(url = %config.url, "connection timed out");
            inner.events.emit(&ClientEvent::Error {
                message: "connection timed out".into(),
            });
            return ConnectionEnd::Dropped;
        }
    };

    let (tx, mut rx) = mpsc::channel::<Outbound>(64);
    {
        let mut state = inner.state();
        state.connection_attempts = 0;
        state.reconnect_delay = config.backoff.base;
        state.outbound = Some(tx);
    }
    // A permanent disconnect that raced the open found no outbound channel.
    if inner.is_terminal() {
        inner.state().outbound = None;
        let _ = ws.close(None).await;
        debug!(url = %config.url, "client stopped during open");
        return ConnectionEnd::Stopped;
    }
    info!(url = %config.url, "connected");
    inner.events.emit(&ClientEvent::Connected);

    let (mut sink, mut stream) = ws.split();
    let mut auth_failed = false;
    let reason = match send_envelope(
        &mut sink,
        &ClientEnvelope::Auth {
            token: token.to_string(),
        },
    )
    .await
    {
        Err(e) => e.to_string(),
        Ok(()) => loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(Outbound::Envelope(envelope)) => {
                        if let Err(e) = send_envelope(&mut sink, &envelope).await {
                            break e.to_string();
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break "closed by client".to_string();
                    }
                },

                msg = stream.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text.to_string(),
                        Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                            Ok(text) => text,
                            Err(_) => {
                                inner.events.emit(&ClientEvent::Error {
                                    message: "received non-UTF-8 binary message".into(),
                                });
                                continue;
                            }
                        },
                        Some(Ok(Message::Close(frame))) => {
                            break frame
                                .map(|f| f.reason.to_string())
                                .filter(|r| !r.is_empty())
                                .unwrap_or_else(|| "connection closed".to_string());
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => break e.to_string(),
                        None => break "connection closed".to_string(),
                    };
                    if handle_text(inner, &text) {
                        auth_failed = true;
                        let _ = sink.send(Message::Close(None)).await;
                        break "authentication failed".to_string();
                    }
                }
            }
        },
    };

    {
        let mut state = inner.state();
        state.authenticated = false;
        state.outbound = None;
    }
    info!(reason = %reason, "disconnected");
    inner.events.emit(&ClientEvent::Disconnected { reason });

    if auth_failed {
        ConnectionEnd::AuthFailed
    } else {
        ConnectionEnd::Dropped
    }
}

/// Translate one server envelope into events. Returns `true` when the
/// server rejected the token.
fn handle_text(inner: &Inner, text: &str) -> bool {
    let envelope = match ServerEnvelope::parse(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            inner.events.emit(&ClientEvent::Error {
                message: e.to_string(),
            });
            return false;
        }
    };

    let event = match envelope {
        ServerEnvelope::AuthResponse(response) => match response.identity() {
            Some(identity) => {
                inner.state().authenticated = true;
                info!(username = %identity.username, "authenticated");
                ClientEvent::Authenticated(identity)
            }
            None => {
                let message = response
                    .message
                    .unwrap_or_else(|| "authentication failed".to_string());
                warn!(message = %message, "authentication rejected");
                inner.events.emit(&ClientEvent::AuthFailed { message });
                return true;
            }
        },
        ServerEnvelope::Text { message, timestamp } => ClientEvent::Text { message, timestamp },
        ServerEnvelope::Audio { data, format } => ClientEvent::Audio { data, format },
        ServerEnvelope::HistoryResponse(page) => ClientEvent::HistoryResponse(page),
        ServerEnvelope::Error { message } => ClientEvent::Error { message },
    };
    inner.events.emit(&event);
    false
}

async fn send_envelope<S>(sink: &mut S, envelope: &ClientEnvelope) -> RelayResult<()>
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let json = envelope.to_json()?;
    sink.send(Message::Text(json.into()))
        .await
        .map_err(|e| RelayError::Transport(format!("WS send failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::WebSocketStream;

    type ServerWs = WebSocketStream<TcpStream>;

    fn quick_config(url: String) -> ClientConfig {
        ClientConfig {
            url,
            backoff: Backoff {
                base: Duration::from_millis(50),
                factor: 2.0,
                max: Duration::from_millis(400),
            },
            open_timeout: Duration::from_secs(2),
            ..ClientConfig::default()
        }
    }

    fn record(client: &ReconnectingClient) -> Arc<Mutex<Vec<ClientEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in EventKind::ALL {
            let events = events.clone();
            client.on(kind, move |e| events.lock().unwrap().push(e.clone()));
        }
        events
    }

    async fn wait_until<F>(events: &Mutex<Vec<ClientEvent>>, pred: F)
    where
        F: Fn(&[ClientEvent]) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if pred(&events.lock().unwrap()) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("expected events did not arrive");
    }

    fn count(events: &[ClientEvent], kind: EventKind) -> usize {
        events.iter().filter(|e| e.kind() == kind).count()
    }

    async fn read_envelope(ws: &mut ServerWs) -> Option<ClientEnvelope> {
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                return ClientEnvelope::parse(text.as_str()).ok();
            }
        }
        None
    }

    async fn send_json(ws: &mut ServerWs, json: String) {
        ws.send(Message::Text(json.into())).await.unwrap();
    }

    async fn send_envelope(ws: &mut ServerWs, envelope: ServerEnvelope) {
        send_json(ws, envelope.to_json().unwrap()).await;
    }

    /// Reads the auth envelope and answers it; returns the token.
    async fn answer_auth(ws: &mut ServerWs, accept: bool) -> String {
        let token = match read_envelope(ws).await {
            Some(ClientEnvelope::Auth { token }) => token,
            other => panic!("expected auth, got {other:?}"),
        };
        let reply = if accept {
            ServerEnvelope::auth_ok(&relay_core::Identity {
                user_id: "42".into(),
                username: "alice".into(),
            })
        } else {
            ServerEnvelope::auth_rejected("invalid token")
        };
        send_envelope(ws, reply).await;
        token
    }

    async fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    async fn accept(listener: &TcpListener) -> ServerWs {
        let (stream, _) = listener.accept().await.unwrap();
        tokio_tungstenite::accept_async(stream).await.unwrap()
    }

    #[tokio::test]
    async fn rejected_token_is_terminal() {
        let (listener, url) = listener().await;
        let connections = Arc::new(AtomicUsize::new(0));
        let seen = connections.clone();
        tokio::spawn(async move {
            loop {
                let mut ws = accept(&listener).await;
                seen.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    answer_auth(&mut ws, false).await;
                    while ws.next().await.is_some() {}
                });
            }
        });

        let client = ReconnectingClient::new(quick_config(url));
        let events = record(&client);
        client.connect("bad-token");
        tokio::time::timeout(Duration::from_secs(5), client.wait())
            .await
            .unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events[0], ClientEvent::Connected);
        assert!(events.contains(&ClientEvent::AuthFailed {
            message: "invalid token".into()
        }));
        assert_eq!(count(&events, EventKind::Reconnecting), 0);
        assert_eq!(count(&events, EventKind::Authenticated), 0);
        assert_eq!(client.desired_state(), DesiredState::Terminal);
        assert!(!client.is_authenticated());
        assert_eq!(connections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_session_reconnects_and_reauthenticates() {
        let (listener, url) = listener().await;
        let tokens = Arc::new(Mutex::new(Vec::new()));
        let seen = tokens.clone();
        tokio::spawn(async move {
            let mut n = 0;
            loop {
                let mut ws = accept(&listener).await;
                n += 1;
                let seen = seen.clone();
                tokio::spawn(async move {
                    if let Some(ClientEnvelope::Auth { token }) = read_envelope(&mut ws).await {
                        seen.lock().unwrap().push(token);
                    }
                    let identity = relay_core::Identity {
                        user_id: "42".into(),
                        username: "alice".into(),
                    };
                    send_envelope(&mut ws, ServerEnvelope::auth_ok(&identity)).await;
                    if n == 1 {
                        let _ = ws.close(None).await;
                    } else {
                        while ws.next().await.is_some() {}
                    }
                });
            }
        });

        let client = ReconnectingClient::new(quick_config(url));
        let events = record(&client);
        client.connect("tok");

        wait_until(&events, |e| count(e, EventKind::Authenticated) == 2).await;
        {
            let events = events.lock().unwrap();
            assert!(events.contains(&ClientEvent::Reconnecting {
                attempt: 1,
                delay: Duration::from_millis(50),
            }));
            assert_eq!(
                events.iter().find(|e| e.kind() == EventKind::Authenticated),
                Some(&ClientEvent::Authenticated(relay_core::Identity {
                    user_id: "42".into(),
                    username: "alice".into(),
                }))
            );
            assert_eq!(count(&events, EventKind::Disconnected), 1);
        }
        assert_eq!(*tokens.lock().unwrap(), vec!["tok", "tok"]);
        assert_eq!(client.connection_attempts(), 0);
        assert_eq!(client.reconnect_delay(), Duration::from_millis(50));
        assert!(client.is_authenticated());

        client.disconnect(true);
        tokio::time::timeout(Duration::from_secs(5), client.wait())
            .await
            .unwrap();
        assert!(!client.is_authenticated());
    }

    #[tokio::test]
    async fn sends_require_authentication() {
        let (listener, url) = listener().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            answer_auth(&mut ws, true).await;
            while let Some(envelope) = read_envelope(&mut ws).await {
                let _ = tx.send(envelope);
            }
        });

        let client = ReconnectingClient::new(quick_config(url));
        assert!(matches!(
            client.send_text("too early").await,
            Err(RelayError::NotReady(_))
        ));

        let events = record(&client);
        client.connect("tok");
        wait_until(&events, |e| count(e, EventKind::Authenticated) == 1).await;

        client.send_text("hello").await.unwrap();
        client.send_audio(&[0, 1, 2, 3], "pcm_s16le", 16_000).await.unwrap();
        client.request_history(10, 5).await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(ClientEnvelope::Text {
                message: "hello".into()
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(ClientEnvelope::Audio {
                data: "AAECAw==".into(),
                format: "pcm_s16le".into(),
                sample_rate: 16_000,
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(ClientEnvelope::HistoryRequest {
                offset: 10,
                limit: 5
            })
        );

        client.disconnect(true);
        client.wait().await;
    }

    #[tokio::test]
    async fn server_envelopes_become_events() {
        let (listener, url) = listener().await;
        tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            answer_auth(&mut ws, true).await;
            send_envelope(
                &mut ws,
                ServerEnvelope::Text {
                    message: "hi".into(),
                    timestamp: "2024-01-01T00:00:00Z".into(),
                },
            )
            .await;
            send_envelope(
                &mut ws,
                ServerEnvelope::Audio {
                    data: "AAECAw==".into(),
                    format: "pcm_s16le".into(),
                },
            )
            .await;
            send_json(&mut ws, "not json".into()).await;
            send_json(
                &mut ws,
                serde_json::json!({
                    "type": "history_response",
                    "messages": [{"role": "user", "content": "earlier"}],
                    "has_more": true
                })
                .to_string(),
            )
            .await;
            send_envelope(&mut ws, ServerEnvelope::error("rate limited")).await;
            while ws.next().await.is_some() {}
        });

        let client = ReconnectingClient::new(quick_config(url));
        let events = record(&client);
        client.connect("tok");
        wait_until(&events, |e| count(e, EventKind::Error) == 2).await;

        {
            let events = events.lock().unwrap();
            assert!(events.contains(&ClientEvent::Text {
                message: "hi".into(),
                timestamp: "2024-01-01T00:00:00Z".into(),
            }));
            assert!(events.contains(&ClientEvent::Audio {
                data: "AAECAw==".into(),
                format: "pcm_s16le".into(),
            }));
            let page = events.iter().find_map(|e| match e {
                ClientEvent::HistoryResponse(page) => Some(page.clone()),
                _ => None,
            });
            let page = page.expect("history page");
            assert!(page.has_more);
            assert_eq!(page.messages[0].content, "earlier");
            assert_eq!(
                events.last(),
                Some(&ClientEvent::Error {
                    message: "rate limited".into()
                })
            );
        }
        // A malformed message does not end the session.
        assert!(client.is_authenticated());

        client.disconnect(true);
        client.wait().await;
    }

    #[tokio::test]
    async fn unreachable_bridge_backs_off_until_stopped() {
        let (dead, url) = listener().await;
        drop(dead);

        let config = quick_config(url);
        let backoff = config.backoff;
        let client = ReconnectingClient::new(config);
        let events = record(&client);
        client.connect("tok");

        wait_until(&events, |e| count(e, EventKind::Reconnecting) >= 3).await;
        client.disconnect(true);
        tokio::time::timeout(Duration::from_secs(5), client.wait())
            .await
            .unwrap();

        let events = events.lock().unwrap();
        let delays: Vec<(u32, Duration)> = events
            .iter()
            .filter_map(|e| match e {
                ClientEvent::Reconnecting { attempt, delay } => Some((*attempt, *delay)),
                _ => None,
            })
            .take(3)
            .collect();
        assert_eq!(
            delays,
            (1..=3).map(|n| (n, backoff.delay_for(n))).collect::<Vec<_>>()
        );
        // Failed dials never opened a session.
        assert_eq!(count(&events, EventKind::Connected), 0);
        assert_eq!(count(&events, EventKind::Disconnected), 0);
        assert!(count(&events, EventKind::Error) >= 3);
        assert_eq!(client.desired_state(), DesiredState::Terminal);
    }

    #[tokio::test]
    async fn permanent_disconnect_during_open_wins() {
        let (listener, url) = listener().await;
        let connections = Arc::new(AtomicUsize::new(0));
        let seen = connections.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                seen.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    // Slow handshake: the client gives up before it completes.
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    answer_auth(&mut ws, true).await;
                    while ws.next().await.is_some() {}
                });
            }
        });

        let client = ReconnectingClient::new(quick_config(url));
        let events = record(&client);
        client.connect("tok");
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.disconnect(true);
        tokio::time::timeout(Duration::from_secs(5), client.wait())
            .await
            .unwrap();

        // Give a wrongly surviving connection time to authenticate.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(client.desired_state(), DesiredState::Terminal);
        assert!(!client.is_authenticated());
        let events = events.lock().unwrap();
        assert_eq!(count(&events, EventKind::Connected), 0);
        assert_eq!(count(&events, EventKind::Authenticated), 0);
        assert_eq!(count(&events, EventKind::Reconnecting), 0);
        assert_eq!(connections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn temporary_disconnect_reconnects() {
        let (listener, url) = listener().await;
        tokio::spawn(async move {
            loop {
                let mut ws = accept(&listener).await;
                tokio::spawn(async move {
                    answer_auth(&mut ws, true).await;
                    while ws.next().await.is_some() {}
                });
            }
        });

        let client = ReconnectingClient::new(quick_config(url));
        let events = record(&client);
        client.connect("tok");
        wait_until(&events, |e| count(e, EventKind::Authenticated) == 1).await;

        client.disconnect(false);
        wait_until(&events, |e| count(e, EventKind::Authenticated) == 2).await;
        assert_eq!(client.desired_state(), DesiredState::ShouldReconnect);
        assert!(events.lock().unwrap().contains(&ClientEvent::Disconnected {
            reason: "closed by client".into()
        }));

        client.disconnect(true);
        client.wait().await;
    }
}
