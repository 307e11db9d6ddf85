//! Path resolution for FitSync realtime data files.
//!
//! Resolved once at startup from: CLI `--data-dir` > `FITSYNC_DATA_DIR` env >
//! `~/.fitsync`.

use std::path::{Path, PathBuf};

pub fn resolve_data_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        p.to_path_buf()
    } else if let Ok(env_val) = std::env::var("FITSYNC_DATA_DIR") {
        PathBuf::from(env_val)
    } else {
        dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".fitsync")
    }
}

pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("realtime.toml")
}

pub fn token_path(data_dir: &Path) -> PathBuf {
    data_dir.join("token")
}
