//! Token verification for bridge sessions.
//!
//! An [`Authenticator`] turns a client token into either an identity plus an
//! open backend connection, or a rejection message. Transport failures are
//! returned as errors so the session can report the backend as unavailable.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use relay_core::{
    dial, write_frame, ClientEnvelope, FrameReader, Identity, RelayError, RelayResult, TagTable,
};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::{AuthMode, BridgeConfig};

/// Result of a completed authentication exchange.
#[derive(Debug)]
pub enum AuthOutcome {
    /// The token was accepted; `backend` becomes the session's back side.
    Accepted {
        identity: Identity,
        backend: TcpStream,
    },
    /// The token was refused, with a message for the client.
    Rejected(String),
}

pub trait Authenticator: Send + Sync + 'static {
    fn authenticate(
        &self,
        token: &str,
    ) -> impl Future<Output = RelayResult<AuthOutcome>> + Send;
}

/// Forwards the token to the backend over a fresh connection and relays the
/// backend's verdict. On success the same connection is kept.
#[derive(Debug, Clone)]
pub struct BackendAuthenticator {
    backend: String,
    dial_timeout: Duration,
    tags: TagTable,
    max_frame_size: usize,
}

impl BackendAuthenticator {
    pub fn new(
        backend: &str,
        dial_timeout: Duration,
        tags: TagTable,
        max_frame_size: usize,
    ) -> Self {
        Self {
            backend: backend.to_string(),
            dial_timeout,
            tags,
            max_frame_size,
        }
    }

    async fn exchange(&self, token: &str) -> RelayResult<AuthOutcome> {
        let mut stream = dial(&self.backend, self.dial_timeout).await?;

        let frame = self.tags.encode(&ClientEnvelope::Auth {
            token: token.to_string(),
        })?;
        write_frame(&mut stream, &frame).await?;

        let reply = {
            let mut reader = FrameReader::new(&mut stream, self.max_frame_size);
            tokio::time::timeout(self.dial_timeout, reader.read_frame())
                .await
                .map_err(|_| RelayError::Timeout)??
        };
        let Some(reply) = reply else {
            return Err(RelayError::BackendUnavailable(
                "backend closed the connection during authentication".into(),
            ));
        };

        let response = self.tags.decode_auth_response(&reply)?;
        match response.identity() {
            Some(identity) => Ok(AuthOutcome::Accepted {
                identity,
                backend: stream,
            }),
            None => Ok(AuthOutcome::Rejected(
                response
                    .message
                    .unwrap_or_else(|| "authentication failed".to_string()),
            )),
        }
    }
}

impl Authenticator for BackendAuthenticator {
    fn authenticate(
        &self,
        token: &str,
    ) -> impl Future<Output = RelayResult<AuthOutcome>> + Send {
        self.exchange(token)
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    user_id: Option<Value>,
    #[serde(default)]
    username: Option<String>,
}

impl Claims {
    fn identity(self) -> Identity {
        let user_id = match self.user_id {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => self.sub.clone().unwrap_or_default(),
        };
        let username = self.username.or(self.sub).unwrap_or_default();
        Identity { user_id, username }
    }
}

/// Verifies HS256 tokens locally, then dials the backend.
#[derive(Clone)]
pub struct JwtAuthenticator {
    decoding_key: DecodingKey,
    validation: Validation,
    backend: String,
    dial_timeout: Duration,
}

impl JwtAuthenticator {
    pub fn new(secret: &[u8], backend: &str, dial_timeout: Duration) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
            backend: backend.to_string(),
            dial_timeout,
        }
    }

    pub fn from_secret_file(
        path: &Path,
        backend: &str,
        dial_timeout: Duration,
    ) -> RelayResult<Self> {
        let secret = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("cannot read jwt secret {}: {e}", path.display()))
        })?;
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(RelayError::Config(format!(
                "jwt secret {} is empty",
                path.display()
            )));
        }
        Ok(Self::new(secret.as_bytes(), backend, dial_timeout))
    }

    fn verify(&self, token: &str) -> Result<Identity, String> {
        match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => Ok(data.claims.identity()),
            Err(e) => match e.kind() {
                ErrorKind::ExpiredSignature => Err("token expired".to_string()),
                _ => {
                    debug!(error = %e, "jwt verification failed");
                    Err("invalid token".to_string())
                }
            },
        }
    }

    async fn verify_and_dial(&self, token: &str) -> RelayResult<AuthOutcome> {
        let identity = match self.verify(token) {
            Ok(identity) => identity,
            Err(message) => return Ok(AuthOutcome::Rejected(message)),
        };
        let backend = dial(&self.backend, self.dial_timeout).await?;
        Ok(AuthOutcome::Accepted { identity, backend })
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(
        &self,
        token: &str,
    ) -> impl Future<Output = RelayResult<AuthOutcome>> + Send {
        self.verify_and_dial(token)
    }
}

/// The authenticator selected by `[auth] mode`.
#[derive(Clone)]
pub enum ConfiguredAuthenticator {
    Backend(BackendAuthenticator),
    Jwt(JwtAuthenticator),
}

impl ConfiguredAuthenticator {
    pub fn from_config(config: &BridgeConfig) -> RelayResult<Self> {
        match config.auth.mode {
            AuthMode::Backend => {
                info!(backend = %config.backend, "authenticating against backend");
                Ok(Self::Backend(BackendAuthenticator::new(
                    &config.backend,
                    config.dial_timeout,
                    config.tags.clone(),
                    config.max_frame_size,
                )))
            }
            AuthMode::Jwt => {
                let path = config.auth.jwt_secret_file.as_deref().ok_or_else(|| {
                    RelayError::Config("jwt mode requires a secret file".into())
                })?;
                info!(secret = %path.display(), "authenticating with local jwt verification");
                Ok(Self::Jwt(JwtAuthenticator::from_secret_file(
                    path,
                    &config.backend,
                    config.dial_timeout,
                )?))
            }
        }
    }
}

impl Authenticator for ConfiguredAuthenticator {
    fn authenticate(
        &self,
        token: &str,
    ) -> impl Future<Output = RelayResult<AuthOutcome>> + Send {
        async move {
            let outcome = match self {
                Self::Backend(a) => a.exchange(token).await,
                Self::Jwt(a) => a.verify_and_dial(token).await,
            };
            if let Ok(AuthOutcome::Rejected(reason)) = &outcome {
                warn!(reason = %reason, "authentication rejected");
            }
            outcome
        }
    }
}
