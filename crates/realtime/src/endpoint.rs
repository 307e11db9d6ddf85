//! Realtime endpoint derivation.
//!
//! The socket lives next to the REST API: `http` maps to `ws`, `https` to
//! `wss`, and the bearer token rides in the `token` query parameter since
//! WebSocket handshakes from mobile clients cannot set headers.

use crate::error::ConfigError;

pub const DEFAULT_REALTIME_PATH: &str = "/ws/chat/";

/// Build the authenticated realtime URL for an API base URL.
pub fn realtime_url(api_base: &str, path: &str, token: &str) -> Result<String, ConfigError> {
    let base = api_base.trim().trim_end_matches('/');
    let rest = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(ConfigError::UnsupportedScheme(api_base.to_string()));
    };

    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };

    Ok(format!(
        "{rest}{path}?token={}",
        urlencoding::encode(token)
    ))
}

/// Same URL with the token replaced, for logs and the `url` subcommand.
pub fn redacted_url(api_base: &str, path: &str) -> Result<String, ConfigError> {
    realtime_url(api_base, path, "<redacted>")
}
