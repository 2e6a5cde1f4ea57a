use thiserror::Error;

/// Errors produced by the relay protocol layer.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("session not ready: {0}")]
    NotReady(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("config error: {0}")]
    Config(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Codec(e.to_string())
    }
}

impl From<base64::DecodeError> for RelayError {
    fn from(e: base64::DecodeError) -> Self {
        RelayError::InvalidEnvelope(format!("invalid base64: {e}"))
    }
}

impl From<std::string::FromUtf8Error> for RelayError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        RelayError::Codec(format!("invalid utf-8: {e}"))
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
