//! Tracing subscriber setup.
//!
//! Logs go to stderr, and additionally to a file when
//! [`LoggingConfig::directory`] is set. The `INSTSYNC_LOG` environment
//! variable overrides the configured filter.

use time::macros::format_description;
use time::UtcOffset;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{SyncError, SyncResult};

/// Environment variable that overrides the configured log filter.
pub const LOG_ENV_VAR: &str = "INSTSYNC_LOG";

/// Keeps the file writer alive. Dropping it flushes pending log lines.
#[derive(Debug)]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global tracing subscriber.
///
/// Returns [`SyncError::InvalidConfig`] if the filter does not parse or a
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> SyncResult<LogGuard> {
    let directive = std::env::var(LOG_ENV_VAR)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| config.level.clone());
    let filter = parse_filter(&directive)?;

    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let timer = OffsetTime::new(
        offset,
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"),
    );

    let stderr_layer = fmt::layer()
        .with_timer(timer.clone())
        .with_writer(std::io::stderr);

    let (file_layer, file_guard) = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| SyncError::CreateDirFailed {
                path: dir.clone(),
                source: e,
            })?;
            let appender = tracing_appender::rolling::never(dir, &config.file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_timer(timer)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| SyncError::InvalidConfig(format!("logging already initialised: {}", e)))?;

    Ok(LogGuard { _file: file_guard })
}

/// Parse a filter directive such as `info` or `instsync=debug,reqwest=warn`.
pub fn parse_filter(directive: &str) -> SyncResult<EnvFilter> {
    EnvFilter::try_new(directive).map_err(|e| {
        SyncError::InvalidConfig(format!("invalid log filter '{}': {}", directive, e))
    })
}
