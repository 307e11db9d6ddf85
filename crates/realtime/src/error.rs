//! Error types for the realtime core.
//!
//! None of these reach the UI: transport failures are retried, auth
//! failures end the session quietly, and the app keeps working off REST.

use thiserror::Error;

/// Errors raised while opening or driving a socket
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("Socket error: {0}")]
    Socket(String),

    #[error("Channel closed")]
    ChannelClosed,
}

/// Errors in configuration and endpoint derivation
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unsupported API scheme in {0:?}; expected http or https")]
    UnsupportedScheme(String),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level error for the realtime library
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Connection actor is not running")]
    ActorGone,
}
