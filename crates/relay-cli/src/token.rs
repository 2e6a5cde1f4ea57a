//! Token lookup: explicit flag or `RELAY_TOKEN`, then the token file.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Expand a leading `~/` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().unwrap_or_default().join(rest),
        None => PathBuf::from(path),
    }
}

/// Pick the token to authenticate with.
///
/// `explicit` already covers both `--token` and `RELAY_TOKEN`. A missing
/// token file is only an error when nothing else supplied a token.
pub fn resolve(explicit: Option<String>, token_file: &Path) -> Result<String> {
    if let Some(token) = explicit.map(|t| t.trim().to_string()) {
        if !token.is_empty() {
            return Ok(token);
        }
    }

    if !token_file.exists() {
        bail!(
            "no token: pass --token, set RELAY_TOKEN, or write one to {}",
            token_file.display()
        );
    }
    let contents = std::fs::read_to_string(token_file)
        .with_context(|| format!("failed to read {}", token_file.display()))?;
    let token = contents.trim();
    if token.is_empty() {
        bail!("no token: {} is empty", token_file.display());
    }
    Ok(token.to_string())
}
