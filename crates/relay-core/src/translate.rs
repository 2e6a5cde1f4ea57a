//! Structural translation between front-side envelopes and backend frames.
//!
//! The numeric tags are owned by the backend, so they live in a [`TagTable`]
//! loaded from configuration rather than in the relay logic. Payload layouts:
//!
//! | kind                       | payload                                             |
//! |----------------------------|-----------------------------------------------------|
//! | auth, text, error          | UTF-8 text                                          |
//! | history request/response   | JSON object                                         |
//! | auth response              | JSON object (`status`, `user_id`, `username`, ...)  |
//! | audio (both directions)    | `[meta_len u32 BE][meta JSON][raw audio bytes]`     |

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::codec::Frame;
use crate::envelope::{AuthResponse, ClientEnvelope, HistoryPage, ServerEnvelope};
use crate::error::{RelayError, RelayResult};

/// Format assumed when backend audio metadata omits `format`.
pub const BACKEND_AUDIO_FORMAT: &str = "wav";

/// Every frame kind the relay knows how to translate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Front → backend.
    Auth,
    Text,
    Audio,
    HistoryRequest,
    /// Backend → front.
    AuthResponse,
    TextReply,
    AudioReply,
    HistoryResponse,
    Error,
}

/// Backend tag values, one per [`FrameKind`].
///
/// Deserializes from the `[tags]` section of the bridge config; omitted
/// entries keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagTable {
    pub auth: u32,
    pub text: u32,
    pub audio: u32,
    pub history_request: u32,
    pub auth_response: u32,
    pub text_reply: u32,
    pub audio_reply: u32,
    pub history_response: u32,
    pub error: u32,
}

impl Default for TagTable {
    fn default() -> Self {
        Self {
            text: 0xFFFF_FFFF,
            text_reply: 0xFFFF_FFFE,
            auth: 0xFFFF_FFFD,
            auth_response: 0xFFFF_FFFC,
            history_request: 0xFFFF_FFFB,
            history_response: 0xFFFF_FFFA,
            audio: 0xFFFF_FFF9,
            audio_reply: 0xFFFF_FFF8,
            error: 0xFFFF_FFF7,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AudioMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sample_rate: Option<u32>,
}

#[derive(Debug, Serialize)]
struct HistoryQuery {
    offset: u64,
    limit: u64,
}

impl TagTable {
    pub fn tag(&self, kind: FrameKind) -> u32 {
        match kind {
            FrameKind::Auth => self.auth,
            FrameKind::Text => self.text,
            FrameKind::Audio => self.audio,
            FrameKind::HistoryRequest => self.history_request,
            FrameKind::AuthResponse => self.auth_response,
            FrameKind::TextReply => self.text_reply,
            FrameKind::AudioReply => self.audio_reply,
            FrameKind::HistoryResponse => self.history_response,
            FrameKind::Error => self.error,
        }
    }

    /// Classify a tag received from the backend.
    pub fn reply_kind(&self, tag: u32) -> Option<FrameKind> {
        [
            FrameKind::AuthResponse,
            FrameKind::TextReply,
            FrameKind::AudioReply,
            FrameKind::HistoryResponse,
            FrameKind::Error,
        ]
        .into_iter()
        .find(|kind| self.tag(*kind) == tag)
    }

    /// Reject tables where two kinds of the same direction share a tag.
    pub fn validate(&self) -> RelayResult<()> {
        let outbound = [self.auth, self.text, self.audio, self.history_request];
        let inbound = [
            self.auth_response,
            self.text_reply,
            self.audio_reply,
            self.history_response,
            self.error,
        ];
        for (name, tags) in [("outbound", &outbound[..]), ("inbound", &inbound[..])] {
            for (i, tag) in tags.iter().enumerate() {
                if tags[i + 1..].contains(tag) {
                    return Err(RelayError::Config(format!(
                        "duplicate {name} tag 0x{tag:08X}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Translate a client envelope into one backend frame.
    pub fn encode(&self, envelope: &ClientEnvelope) -> RelayResult<Frame> {
        match envelope {
            ClientEnvelope::Auth { token } => Ok(Frame::new(self.auth, token.as_bytes())),
            ClientEnvelope::Text { message } => Ok(Frame::new(self.text, message.as_bytes())),
            ClientEnvelope::Audio {
                data,
                format,
                sample_rate,
            } => {
                let audio = BASE64.decode(data)?;
                let meta = AudioMeta {
                    format: Some(format.clone()),
                    sample_rate: Some(*sample_rate),
                };
                Ok(Frame::new(self.audio, pack_audio(&meta, &audio)?))
            }
            ClientEnvelope::HistoryRequest { offset, limit } => {
                let query = serde_json::to_vec(&HistoryQuery {
                    offset: *offset,
                    limit: *limit,
                })?;
                Ok(Frame::new(self.history_request, query))
            }
        }
    }

    /// Translate one backend frame into the matching client envelope.
    ///
    /// Text replies are stamped with the time of translation.
    pub fn decode(&self, frame: &Frame) -> RelayResult<ServerEnvelope> {
        let kind = self
            .reply_kind(frame.tag)
            .ok_or_else(|| RelayError::UnknownType(format!("backend tag 0x{:08X}", frame.tag)))?;

        match kind {
            FrameKind::AuthResponse => Ok(ServerEnvelope::AuthResponse(parse_auth_payload(
                &frame.payload,
            )?)),
            FrameKind::TextReply => Ok(ServerEnvelope::text_now(utf8(&frame.payload)?)),
            FrameKind::AudioReply => {
                let (meta, audio) = unpack_audio(&frame.payload)?;
                Ok(ServerEnvelope::Audio {
                    data: BASE64.encode(audio),
                    format: meta.format.unwrap_or_else(|| BACKEND_AUDIO_FORMAT.to_string()),
                })
            }
            FrameKind::HistoryResponse => {
                let page: HistoryPage = serde_json::from_slice(&frame.payload).map_err(|e| {
                    RelayError::Codec(format!("invalid history payload: {e}"))
                })?;
                Ok(ServerEnvelope::HistoryResponse(page))
            }
            FrameKind::Error => Ok(ServerEnvelope::error(utf8(&frame.payload)?)),
            other => Err(RelayError::Codec(format!(
                "{other:?} is not a backend reply kind"
            ))),
        }
    }

    /// Decode the backend's answer to an auth frame.
    pub fn decode_auth_response(&self, frame: &Frame) -> RelayResult<AuthResponse> {
        if frame.tag != self.auth_response {
            return Err(RelayError::InvalidEnvelope(format!(
                "expected auth response, got backend tag 0x{:08X}",
                frame.tag
            )));
        }
        parse_auth_payload(&frame.payload)
    }
}

fn utf8(payload: &[u8]) -> RelayResult<String> {
    Ok(String::from_utf8(payload.to_vec())?)
}

fn parse_auth_payload(payload: &[u8]) -> RelayResult<AuthResponse> {
    serde_json::from_slice(payload)
        .map_err(|e| RelayError::Codec(format!("invalid auth response payload: {e}")))
}

fn pack_audio(meta: &AudioMeta, audio: &[u8]) -> RelayResult<Vec<u8>> {
    let meta_json = serde_json::to_vec(meta)?;
    let mut out = Vec::with_capacity(4 + meta_json.len() + audio.len());
    out.extend_from_slice(&(meta_json.len() as u32).to_be_bytes());
    out.extend_from_slice(&meta_json);
    out.extend_from_slice(audio);
    Ok(out)
}

fn unpack_audio(payload: &[u8]) -> RelayResult<(AudioMeta, &[u8])> {
    if payload.len() < 4 {
        return Err(RelayError::Codec("audio payload too short".into()));
    }
    let meta_len = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    let rest = &payload[4..];
    if rest.len() < meta_len {
        return Err(RelayError::Codec(format!(
            "audio metadata truncated: need {meta_len} bytes, have {}",
            rest.len()
        )));
    }
    let meta: AudioMeta = serde_json::from_slice(&rest[..meta_len])
        .map_err(|e| RelayError::Codec(format!("invalid audio metadata: {e}")))?;
    Ok((meta, &rest[meta_len..]))
}
