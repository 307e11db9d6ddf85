//! File logging for the realtime binary.
//!
//! Logs go to `<data_dir>/logs/realtime.<date>.log`, rotated daily with a
//! week of history. `FITSYNC_LOG_FILTER` (then `RUST_LOG`) picks the filter
//! and `FITSYNC_LOG_FORMAT=pretty` switches from JSON to multi-line text.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::paths;

const DEFAULT_FILTER: &str = "info";
const LOG_PREFIX: &str = "realtime";
const LOG_SUFFIX: &str = "log";
const MAX_LOG_FILES: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        }
    }
}

/// Filter directive: `FITSYNC_LOG_FILTER`, then `RUST_LOG`, then `info`.
/// A directive that does not parse falls through to the next source.
fn filter_directive(fitsync: Option<String>, rust_log: Option<String>) -> String {
    [fitsync, rust_log]
        .into_iter()
        .flatten()
        .find(|value| EnvFilter::try_new(value).is_ok())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

pub struct LoggingHandle {
    pub run_id: String,
    pub log_dir: PathBuf,
    /// Flushes buffered lines when dropped; keep it alive for the process.
    pub guard: WorkerGuard,
}

pub fn init_logging(data_dir: &Path) -> anyhow::Result<LoggingHandle> {
    let log_dir = paths::log_dir(data_dir);
    std::fs::create_dir_all(&log_dir)?;

    let directive = filter_directive(
        std::env::var("FITSYNC_LOG_FILTER").ok(),
        std::env::var("RUST_LOG").ok(),
    );
    let filter = EnvFilter::try_new(&directive)?;
    let format = LogFormat::parse(std::env::var("FITSYNC_LOG_FORMAT").ok().as_deref());

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_PREFIX)
        .filename_suffix(LOG_SUFFIX)
        .max_log_files(MAX_LOG_FILES)
        .build(&log_dir)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .pretty()
                    .with_target(true),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .flatten_event(true)
                    .with_target(true)
                    .with_current_span(true),
            )
            .try_init()?,
    }

    let run_id = std::env::var("FITSYNC_RUN_ID").unwrap_or_else(|_| {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        format!("pid-{}-{}", std::process::id(), now)
    });

    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        run_id = %run_id,
        log_dir = %log_dir.display(),
        format = format.as_str(),
        filter = %directive,
    );

    Ok(LoggingHandle {
        run_id,
        log_dir,
        guard,
    })
}
