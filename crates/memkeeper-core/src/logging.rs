//! Logging infrastructure for memkeeper.
//!
//! memkeeper runs inside short-lived hooks, so stderr stays quiet by default
//! and the full trail goes to a JSON lines file next to the worker's data.
//!
//! ## Features
//!
//! - JSON lines format for machine parsing
//! - File output to `~/.claude-mem/logs/memkeeper.log.<date>`
//! - Console output with configurable verbosity
//!
//! ## Example
//!
//! ```no_run
//! use memkeeper_core::logging;
//!
//! let _guard = logging::init_logging(None, false).expect("logging init");
//!
//! tracing::info!("memkeeper started");
//! tracing::debug!(port = 37777, "probing worker");
//! ```

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::error::{MemkeeperError, Result};

/// Environment variable that relocates the worker data directory.
pub const DATA_DIR_ENV: &str = "CLAUDE_MEM_DATA_DIR";

/// Guard that must be held to ensure log flushing on shutdown.
///
/// Keep this guard alive for the lifetime of the process.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the memkeeper logging system.
///
/// This sets up:
/// - File logging under `log_dir` (JSON lines format, daily rotation)
/// - Console logging to stderr (human-readable format)
///
/// # Arguments
///
/// * `log_dir` - Optional custom log directory. Defaults to [`default_log_dir`]
/// * `verbose` - If true, sets log level to DEBUG. Otherwise uses INFO.
pub fn init_logging(log_dir: Option<PathBuf>, verbose: bool) -> Result<LogGuard> {
    let log_dir = match log_dir {
        Some(dir) => dir,
        None => default_log_dir()?,
    };

    std::fs::create_dir_all(&log_dir).map_err(|e| MemkeeperError::DirectoryCreation {
        path: log_dir.clone(),
        source: e,
    })?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "memkeeper.log");
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("memkeeper={default_level}")));

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .json()
        .with_span_events(FmtSpan::CLOSE)
        .with_current_span(true)
        .with_span_list(true);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(verbose)
        .with_line_number(verbose)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    tracing::debug!(log_dir = %log_dir.display(), verbose, "logging initialized");

    Ok(LogGuard {
        _file_guard: Some(file_guard),
    })
}

/// Initialize minimal console-only logging for testing.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

/// Get the default data directory.
///
/// Returns `$CLAUDE_MEM_DATA_DIR` when set to a non-blank value, otherwise
/// `~/.claude-mem/`.
pub fn default_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }

    let home = dirs::home_dir().ok_or_else(|| MemkeeperError::Internal {
        message: "could not determine home directory".into(),
    })?;

    Ok(home.join(".claude-mem"))
}

/// Get the default log directory path.
///
/// Returns `<data dir>/logs/`
pub fn default_log_dir() -> Result<PathBuf> {
    Ok(default_data_dir()?.join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_default_log_dir_follows_data_dir() {
        // SAFETY: serialized with every other test touching the environment
        unsafe { std::env::set_var(DATA_DIR_ENV, "/tmp/test-data") };
        assert_eq!(default_data_dir().unwrap(), PathBuf::from("/tmp/test-data"));
        assert_eq!(default_log_dir().unwrap(), PathBuf::from("/tmp/test-data/logs"));

        // SAFETY: as above
        unsafe { std::env::remove_var(DATA_DIR_ENV) };
        let home = dirs::home_dir().unwrap();
        assert_eq!(default_log_dir().unwrap(), home.join(".claude-mem").join("logs"));
    }

    #[test]
    #[serial]
    fn test_blank_data_dir_env_is_unset() {
        let home = dirs::home_dir().unwrap();

        for blank in ["", "   "] {
            // SAFETY: serialized with every other test touching the environment
            unsafe { std::env::set_var(DATA_DIR_ENV, blank) };
            let data_dir = default_data_dir().unwrap();
            let log_dir = default_log_dir().unwrap();
            // SAFETY: as above
            unsafe { std::env::remove_var(DATA_DIR_ENV) };

            assert_eq!(data_dir, home.join(".claude-mem"));
            assert_eq!(log_dir, home.join(".claude-mem").join("logs"));
        }
    }

    #[test]
    fn test_init_test_logging() {
        // Should not panic
        init_test_logging();
    }
}
