//! Bridge configuration: TOML file + CLI overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use relay_core::{RelayError, RelayResult, TagTable, DEFAULT_MAX_FRAME_SIZE};
use serde::Deserialize;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub bridge: BridgeSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub tags: TagTable,
}

/// `[bridge]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeSection {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_secs: u64,
    #[serde(default = "default_max_size")]
    pub max_frame_size: usize,
    #[serde(default = "default_max_size")]
    pub max_message_size: usize,
    /// Zero disables the idle timeout.
    #[serde(default)]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backend: default_backend(),
            dial_timeout_secs: default_dial_timeout(),
            max_frame_size: default_max_size(),
            max_message_size: default_max_size(),
            idle_timeout_secs: 0,
            stats_interval_secs: default_stats_interval(),
        }
    }
}

/// How client tokens are verified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Forward the token to the backend and relay its verdict.
    #[default]
    Backend,
    /// Verify an HS256 JWT locally, then dial the backend.
    Jwt,
}

/// `[auth]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    #[serde(default)]
    pub mode: AuthMode,
    #[serde(default)]
    pub jwt_secret_file: Option<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_window")]
    pub window_secs: u64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            mode: AuthMode::default(),
            jwt_secret_file: None,
            max_attempts: default_max_attempts(),
            window_secs: default_window(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8765".to_string()
}
fn default_backend() -> String {
    "127.0.0.1:5555".to_string()
}
fn default_dial_timeout() -> u64 {
    10
}
fn default_max_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}
fn default_stats_interval() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    5
}
fn default_window() -> u64 {
    60
}

/// Values given on the command line; each one wins over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub listen: Option<String>,
    pub backend: Option<String>,
    pub idle_timeout_secs: Option<u64>,
}

/// Resolved auth settings.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub jwt_secret_file: Option<PathBuf>,
    pub max_attempts: u32,
    pub window_secs: u64,
}

/// Resolved bridge configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub listen: String,
    pub backend: String,
    pub dial_timeout: Duration,
    pub max_frame_size: usize,
    pub max_message_size: usize,
    pub idle_timeout: Option<Duration>,
    pub stats_interval: Duration,
    pub auth: AuthConfig,
    pub tags: TagTable,
}

impl BridgeConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, overrides: Overrides) -> RelayResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| RelayError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };
        Self::resolve(file_config, overrides)
    }

    /// Merge overrides into a parsed file and validate the result.
    pub fn resolve(file: ConfigFile, overrides: Overrides) -> RelayResult<Self> {
        let ConfigFile { bridge, auth, tags } = file;
        tags.validate()?;

        if bridge.dial_timeout_secs == 0 {
            return Err(RelayError::Config("dial_timeout_secs must be positive".into()));
        }
        if bridge.max_frame_size == 0 || bridge.max_message_size == 0 {
            return Err(RelayError::Config("size limits must be positive".into()));
        }
        if auth.max_attempts == 0 {
            return Err(RelayError::Config("auth.max_attempts must be positive".into()));
        }

        let jwt_secret_file = auth.jwt_secret_file.as_deref().map(expand_tilde_str);
        if auth.mode == AuthMode::Jwt && jwt_secret_file.is_none() {
            return Err(RelayError::Config(
                "auth.mode = \"jwt\" requires auth.jwt_secret_file".into(),
            ));
        }

        let idle = overrides.idle_timeout_secs.unwrap_or(bridge.idle_timeout_secs);

        Ok(Self {
            listen: overrides.listen.unwrap_or(bridge.listen),
            backend: overrides.backend.unwrap_or(bridge.backend),
            dial_timeout: Duration::from_secs(bridge.dial_timeout_secs),
            max_frame_size: bridge.max_frame_size,
            max_message_size: bridge.max_message_size,
            idle_timeout: (idle > 0).then(|| Duration::from_secs(idle)),
            stats_interval: Duration::from_secs(bridge.stats_interval_secs),
            auth: AuthConfig {
                mode: auth.mode,
                jwt_secret_file,
                max_attempts: auth.max_attempts,
                window_secs: auth.window_secs,
            },
            tags,
        })
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
