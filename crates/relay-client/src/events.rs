//! Client events and the handler registry.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use relay_core::envelope::HistoryPage;
use relay_core::Identity;
use tracing::error;

/// Event names handlers can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Authenticated,
    AuthFailed,
    Disconnected,
    Reconnecting,
    Text,
    Audio,
    HistoryResponse,
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        EventKind::Connected,
        EventKind::Authenticated,
        EventKind::AuthFailed,
        EventKind::Disconnected,
        EventKind::Reconnecting,
        EventKind::Text,
        EventKind::Audio,
        EventKind::HistoryResponse,
        EventKind::Error,
    ];
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The WebSocket opened; the auth envelope has not been answered yet.
    Connected,
    Authenticated(Identity),
    /// Terminal: the client will not retry on its own.
    AuthFailed { message: String },
    Disconnected { reason: String },
    Reconnecting { attempt: u32, delay: Duration },
    Text { message: String, timestamp: String },
    /// `data` is base64, as received.
    Audio { data: String, format: String },
    HistoryResponse(HistoryPage),
    /// A failure that did not close the session by itself.
    Error { message: String },
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connected,
            Self::Authenticated(_) => EventKind::Authenticated,
            Self::AuthFailed { .. } => EventKind::AuthFailed,
            Self::Disconnected { .. } => EventKind::Disconnected,
            Self::Reconnecting { .. } => EventKind::Reconnecting,
            Self::Text { .. } => EventKind::Text,
            Self::Audio { .. } => EventKind::Audio,
            Self::HistoryResponse(_) => EventKind::HistoryResponse,
            Self::Error { .. } => EventKind::Error,
        }
    }
}

type Handler = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// Ordered handler lists, one per [`EventKind`].
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for `kind`. Handlers run in registration order.
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Deliver `event` to every handler of its kind.
    ///
    /// A panicking handler is logged and skipped; the remaining handlers
    /// still run. Returns how many handlers panicked.
    pub fn emit(&self, event: &ClientEvent) -> usize {
        // Snapshot so handlers may register further handlers.
        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();

        let mut panicked = 0;
        for handler in handlers {
            let result = catch_unwind(AssertUnwindSafe(|| handler(event)));
            if let Err(panic_info) = result {
                let msg = panic_info
                    .downcast_ref::<String>()
                    .map(String::as_str)
                    .or_else(|| panic_info.downcast_ref::<&str>().copied())
                    .unwrap_or("unknown panic");
                error!(event = ?event.kind(), panic = msg, "event handler panicked");
                panicked += 1;
            }
        }
        panicked
    }
}
