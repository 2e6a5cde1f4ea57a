//! relay-core: Shared protocol library for the transport relay.
//!
//! Provides the front-side JSON envelope types, the backend's length-framed
//! binary codec, the configurable tag table and translators between the two,
//! lock-free connection statistics, and socket tuning helpers.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod net;
pub mod stats;
pub mod translate;

// Re-export commonly used items at crate root.
pub use codec::{write_frame, Frame, FrameReader, DEFAULT_MAX_FRAME_SIZE, HEADER_LEN};
pub use envelope::{ClientEnvelope, Identity, ServerEnvelope};
pub use error::{RelayError, RelayResult};
pub use net::{dial, tune_stream};
pub use stats::{spawn_reporter, ConnectionGuard, ConnectionStats, StatsSnapshot};
pub use translate::{FrameKind, TagTable};
