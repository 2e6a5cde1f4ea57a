//! Front-side JSON envelopes.
//!
//! Every message on the client-facing connection is a JSON object with a
//! `type` discriminator. [`ClientEnvelope`] covers what clients send,
//! [`ServerEnvelope`] what the bridge sends back.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{RelayError, RelayResult};

/// Audio format assumed when a client omits `format`.
pub const DEFAULT_AUDIO_FORMAT: &str = "pcm_s16le";
/// Sample rate assumed when a client omits `sampleRate`.
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;
/// Page size assumed when a client omits `limit`.
pub const DEFAULT_HISTORY_LIMIT: u64 = 50;
/// Status value of a successful `auth_response`.
pub const STATUS_OK: &str = "ok";

const CLIENT_TYPES: &[&str] = &["auth", "text", "audio", "history_request"];
const SERVER_TYPES: &[&str] = &["auth_response", "text", "audio", "history_response", "error"];

/// Envelopes sent by clients to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    Auth {
        #[serde(default)]
        token: String,
    },
    Text {
        message: String,
    },
    Audio {
        /// Base64-encoded raw audio.
        data: String,
        #[serde(default = "default_audio_format")]
        format: String,
        #[serde(rename = "sampleRate", default = "default_sample_rate")]
        sample_rate: u32,
    },
    HistoryRequest {
        #[serde(default)]
        offset: u64,
        #[serde(default = "default_history_limit")]
        limit: u64,
    },
}

fn default_audio_format() -> String {
    DEFAULT_AUDIO_FORMAT.to_string()
}
fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}
fn default_history_limit() -> u64 {
    DEFAULT_HISTORY_LIMIT
}

impl ClientEnvelope {
    /// Parse one envelope from its JSON text.
    ///
    /// Distinguishes a well-formed object with an unrecognised `type`
    /// ([`RelayError::UnknownType`]) from malformed input
    /// ([`RelayError::InvalidEnvelope`]).
    pub fn parse(text: &str) -> RelayResult<Self> {
        let value = parse_object(text)?;
        let kind = type_of(&value)?;
        if !CLIENT_TYPES.contains(&kind) {
            return Err(RelayError::UnknownType(kind.to_string()));
        }
        serde_json::from_value(value).map_err(|e| RelayError::InvalidEnvelope(e.to_string()))
    }

    /// The wire name of this envelope's `type`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::Text { .. } => "text",
            Self::Audio { .. } => "audio",
            Self::HistoryRequest { .. } => "history_request",
        }
    }

    pub fn to_json(&self) -> RelayResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Authenticated user identity, carried in `auth_response`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
}

/// Payload of an `auth_response` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub status: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "string_or_number"
    )]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuthResponse {
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    /// The identity carried by a successful response.
    ///
    /// Missing fields default to empty strings; returns `None` for rejections.
    pub fn identity(&self) -> Option<Identity> {
        if !self.is_ok() {
            return None;
        }
        Some(Identity {
            user_id: self.user_id.clone().unwrap_or_default(),
            username: self.username.clone().unwrap_or_default(),
        })
    }
}

/// One entry of a `history_response` page.
///
/// Only `role` is interpreted; everything else the backend sent is carried
/// through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HistoryEntry {
    /// `content` as display text: strings verbatim, anything else as JSON.
    pub fn content_text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// Payload of a `history_response` envelope. Unknown backend fields are
/// kept in `extra` and serialized back at the top level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPage {
    #[serde(default)]
    pub messages: Vec<HistoryEntry>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Envelopes sent by the bridge to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    AuthResponse(AuthResponse),
    Text {
        message: String,
        /// RFC 3339 UTC time at which the bridge relayed the message.
        timestamp: String,
    },
    Audio {
        /// Base64-encoded raw audio.
        data: String,
        format: String,
    },
    HistoryResponse(HistoryPage),
    Error {
        message: String,
    },
}

impl ServerEnvelope {
    /// Parse one envelope from its JSON text (client side).
    pub fn parse(text: &str) -> RelayResult<Self> {
        let value = parse_object(text)?;
        let kind = type_of(&value)?;
        if !SERVER_TYPES.contains(&kind) {
            return Err(RelayError::UnknownType(kind.to_string()));
        }
        serde_json::from_value(value).map_err(|e| RelayError::InvalidEnvelope(e.to_string()))
    }

    /// The wire name of this envelope's `type`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthResponse(_) => "auth_response",
            Self::Text { .. } => "text",
            Self::Audio { .. } => "audio",
            Self::HistoryResponse(_) => "history_response",
            Self::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> RelayResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// A text envelope stamped with the current UTC time.
    pub fn text_now(message: impl Into<String>) -> Self {
        Self::Text {
            message: message.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn auth_ok(identity: &Identity) -> Self {
        Self::AuthResponse(AuthResponse {
            status: STATUS_OK.to_string(),
            user_id: Some(identity.user_id.clone()),
            username: Some(identity.username.clone()),
            message: None,
        })
    }

    pub fn auth_rejected(message: impl Into<String>) -> Self {
        Self::AuthResponse(AuthResponse {
            status: "error".to_string(),
            user_id: None,
            username: None,
            message: Some(message.into()),
        })
    }
}

fn parse_object(text: &str) -> RelayResult<Value> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| RelayError::InvalidEnvelope(format!("invalid JSON: {e}")))?;
    if !value.is_object() {
        return Err(RelayError::InvalidEnvelope("envelope must be a JSON object".into()));
    }
    Ok(value)
}

fn type_of(value: &Value) -> RelayResult<&str> {
    value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| RelayError::InvalidEnvelope("missing type field".into()))
}

/// Backends report numeric user ids; the envelope always carries a string.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_audio_applies_defaults() {
        let env = ClientEnvelope::parse(r#"{"type":"audio","data":"AAEC"}"#).unwrap();
        assert_eq!(
            env,
            ClientEnvelope::Audio {
                data: "AAEC".into(),
                format: "pcm_s16le".into(),
                sample_rate: 16_000,
            }
        );
    }

    #[test]
    fn parse_sample_rate_uses_camel_case() {
        let env = ClientEnvelope::parse(
            r#"{"type":"audio","data":"","format":"pcm_f32le","sampleRate":48000}"#,
        )
        .unwrap();
        match env {
            ClientEnvelope::Audio { sample_rate, format, .. } => {
                assert_eq!(sample_rate, 48_000);
                assert_eq!(format, "pcm_f32le");
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn parse_history_defaults() {
        let env = ClientEnvelope::parse(r#"{"type":"history_request"}"#).unwrap();
        assert_eq!(env, ClientEnvelope::HistoryRequest { offset: 0, limit: 50 });
    }

    #[test]
    fn unknown_type_is_distinguished() {
        let err = ClientEnvelope::parse(r#"{"type":"bogus"}"#).unwrap_err();
        assert!(matches!(err, RelayError::UnknownType(t) if t == "bogus"));
    }

    #[test]
    fn malformed_input_is_invalid() {
        assert!(matches!(
            ClientEnvelope::parse("not json").unwrap_err(),
            RelayError::InvalidEnvelope(_)
        ));
        assert!(matches!(
            ClientEnvelope::parse(r#"{"message":"no type"}"#).unwrap_err(),
            RelayError::InvalidEnvelope(_)
        ));
        assert!(matches!(
            ClientEnvelope::parse(r#"["type","text"]"#).unwrap_err(),
            RelayError::InvalidEnvelope(_)
        ));
        assert!(matches!(
            ClientEnvelope::parse(r#"{"type":"text"}"#).unwrap_err(),
            RelayError::InvalidEnvelope(_)
        ));
    }

    #[test]
    fn auth_without_token_parses_as_empty() {
        let env = ClientEnvelope::parse(r#"{"type":"auth"}"#).unwrap();
        assert_eq!(env, ClientEnvelope::Auth { token: String::new() });
    }

    #[test]
    fn auth_response_accepts_numeric_user_id() {
        let env = ServerEnvelope::parse(
            r#"{"type":"auth_response","status":"ok","user_id":42,"username":"alice"}"#,
        )
        .unwrap();
        match env {
            ServerEnvelope::AuthResponse(resp) => {
                let id = resp.identity().unwrap();
                assert_eq!(id.user_id, "42");
                assert_eq!(id.username, "alice");
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn rejected_response_has_no_identity() {
        let env = ServerEnvelope::auth_rejected("bad token");
        let json = env.to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "auth_response");
        assert_eq!(value["status"], "error");
        assert_eq!(value["message"], "bad token");
        assert!(value.get("user_id").is_none());

        match ServerEnvelope::parse(&json).unwrap() {
            ServerEnvelope::AuthResponse(resp) => assert!(resp.identity().is_none()),
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn history_response_serializes_flat() {
        let env = ServerEnvelope::HistoryResponse(HistoryPage {
            messages: vec![HistoryEntry {
                role: "user".into(),
                content: "hello".into(),
                timestamp: Some(Value::from("2024-01-01T00:00:00Z")),
                extra: Map::new(),
            }],
            has_more: true,
            extra: Map::new(),
        });
        let value: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "history_response");
        assert_eq!(value["has_more"], true);
        assert_eq!(value["messages"][0]["role"], "user");
    }

    #[test]
    fn text_now_carries_timestamp() {
        match ServerEnvelope::text_now("hi") {
            ServerEnvelope::Text { message, timestamp } => {
                assert_eq!(message, "hi");
                assert!(chrono::DateTime::parse_from_rfc3339(&timestamp).is_ok());
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }
}
