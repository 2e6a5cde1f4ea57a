//! WebSocket plumbing for the front side of the bridge.

use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use relay_core::{RelayError, RelayResult, ServerEnvelope};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

pub type FrontStream = WebSocketStream<TcpStream>;
type FrontSink = SplitSink<FrontStream, Message>;

/// Complete the WebSocket handshake with the given message size bound.
pub async fn accept(stream: TcpStream, max_message_size: usize) -> RelayResult<FrontStream> {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_message_size);
    config.max_frame_size = Some(max_message_size);
    tokio_tungstenite::accept_async_with_config(stream, Some(config))
        .await
        .map_err(|e| RelayError::Transport(format!("WS handshake failed: {e}")))
}

/// Serialize an envelope into a text message.
pub fn envelope_message(envelope: &ServerEnvelope) -> RelayResult<Message> {
    Ok(Message::Text(envelope.to_json()?.into()))
}

/// Spawn the task that owns the sink.
///
/// Messages are written in the order they were queued. A queued
/// [`Message::Close`] is sent and ends the task; so does a write error or
/// every sender being dropped.
pub fn spawn_writer(mut sink: FrontSink) -> (mpsc::Sender<Message>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Message>(64);
    let handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = sink.send(msg).await {
                debug!(error = %e, "WS send failed");
                break;
            }
            if closing {
                break;
            }
        }
        let _ = sink.close().await;
    });
    (tx, handle)
}
