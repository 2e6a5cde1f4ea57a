//! relay-client: the initiating side of a bridge session.
//!
//! [`ReconnectingClient`] opens the WebSocket, authenticates with a token,
//! and keeps the logical session alive across network drops using an
//! exponential backoff. Everything it observes is delivered as a
//! [`ClientEvent`] to handlers registered per [`EventKind`].

pub mod backoff;
pub mod client;
pub mod events;

pub use backoff::Backoff;
pub use client::{ClientConfig, DesiredState, ReconnectingClient};
pub use events::{ClientEvent, EventBus, EventKind};
