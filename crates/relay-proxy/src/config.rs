//! Proxy configuration resolved from CLI flags.

use std::time::Duration;

use relay_core::{RelayError, RelayResult};

/// Resolved proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Listen address (`host:port`).
    pub listen: String,
    /// Upstream address every connection is forwarded to.
    pub target: String,
    pub dial_timeout: Duration,
    /// Per-direction copy buffer size in bytes.
    pub buffer_size: usize,
    /// Interval of the stats log line; zero disables it.
    pub stats_interval: Duration,
}

impl ProxyConfig {
    pub fn new(
        listen: &str,
        target: &str,
        dial_timeout_secs: u64,
        buffer_size: usize,
        stats_interval_secs: u64,
    ) -> RelayResult<Self> {
        let target = target.trim();
        if target.is_empty() {
            return Err(RelayError::Config(format!(
                "target address is required (--target or {TARGET_ENV})"
            )));
        }
        if buffer_size == 0 {
            return Err(RelayError::Config("buffer size must be positive".into()));
        }
        if dial_timeout_secs == 0 {
            return Err(RelayError::Config("dial timeout must be positive".into()));
        }
        Ok(Self {
            listen: normalize_listen(listen),
            target: target.to_string(),
            dial_timeout: Duration::from_secs(dial_timeout_secs),
            buffer_size,
            stats_interval: Duration::from_secs(stats_interval_secs),
        })
    }
}

/// Environment variable that overrides `--target`.
pub const TARGET_ENV: &str = "RELAY_PROXY_TARGET";

/// Pick the target: a non-empty environment value beats the flag.
pub fn resolve_target(flag: Option<String>, env: Option<String>) -> Option<String> {
    env.filter(|t| !t.trim().is_empty()).or(flag)
}

/// Accept the `:port` shorthand for "all interfaces".
fn normalize_listen(listen: &str) -> String {
    match listen.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => listen.to_string(),
    }
}
