//! Read-only access to the bearer token.
//!
//! Token persistence belongs to the auth layer; the realtime core only asks
//! for the current value when it is about to connect.

use std::path::{Path, PathBuf};

pub trait TokenStore: Send + Sync {
    /// Current bearer token, or `None` when signed out.
    fn token(&self) -> Option<String>;
}

/// Fixed token, for the CLI `--token` flag and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenStore {
    token: Option<String>,
}

impl StaticTokenStore {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

impl TokenStore for StaticTokenStore {
    fn token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// Token kept in a plain file, re-read on every lookup so a refreshed token
/// is picked up by the next connection attempt.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn token(&self) -> Option<String> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        let token = raw.trim();
        if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        }
    }
}
