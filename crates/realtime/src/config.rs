//! Realtime configuration
//!
//! Read from an optional TOML file; CLI flags override individual fields.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::{DEFAULT_MIN_TOKEN_LEN, DEFAULT_RETRY_DELAY};
use crate::connection_actor::ConnectionSettings;
use crate::endpoint::DEFAULT_REALTIME_PATH;
use crate::error::ConfigError;

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub api_base_url: String,
    pub realtime_path: String,
    /// Fixed delay between reconnect attempts.
    pub retry_delay_ms: u64,
    pub min_token_len: usize,
    /// Buffer between the connection and the synchronizer.
    pub channel_capacity: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            realtime_path: DEFAULT_REALTIME_PATH.to_string(),
            retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
            min_token_len: DEFAULT_MIN_TOKEN_LEN,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl RealtimeConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            api_base_url: self.api_base_url.clone(),
            realtime_path: self.realtime_path.clone(),
            retry_delay: self.retry_delay(),
            min_token_len: self.min_token_len,
        }
    }
}
