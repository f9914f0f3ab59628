//! Error types for memkeeper operations.
//!
//! Only two conditions are allowed to abort a caller of `ensure_available`:
//! a process-manager start failure and an exhausted wait budget. Everything
//! else (probe failures, listing failures, version read failures) degrades
//! inside the worker crate and never becomes a [`MemkeeperError`].

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`MemkeeperError`].
pub type Result<T> = std::result::Result<T, MemkeeperError>;

/// Error type for all memkeeper operations.
#[derive(Debug, Error)]
pub enum MemkeeperError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Settings file exists but could not be used
    #[error("Invalid settings at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    /// Option combination rejected before any work was done
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String },

    /// A setting is present but its value is unusable
    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidSetting {
        key: String,
        value: String,
        reason: String,
    },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error with context
    #[error("I/O error {operation}: {path}")]
    Io {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory creation failed
    #[error("Failed to create directory: {path}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // =========================================================================
    // Parsing Errors
    // =========================================================================
    /// JSON parsing error
    #[error("JSON parse error in {context}: {message}")]
    JsonParse {
        context: String,
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // =========================================================================
    // Process Supervisor Errors
    // =========================================================================
    /// The supervisor binary could not be executed at all
    #[error("Process supervisor {program} unavailable: {message}")]
    SupervisorUnavailable { program: String, message: String },

    /// The supervisor produced output we could not interpret
    #[error("Unreadable process supervisor output: {message}")]
    SupervisorOutput { message: String },

    /// The start command exited with a genuine failure code
    #[error("Start command for {name} failed with exit code {exit_code}")]
    StartFailed { name: String, exit_code: i32 },

    /// The start command did not return in time
    #[error("Start command for {name} timed out after {timeout_ms}ms")]
    StartTimeout { name: String, timeout_ms: u64 },

    // =========================================================================
    // Worker Errors
    // =========================================================================
    /// Worker never answered its liveness probe within the wait budget
    #[error("Worker at {endpoint} did not become healthy within {elapsed_ms}ms")]
    WorkerUnavailable { endpoint: String, elapsed_ms: u64 },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error (bug in memkeeper)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl MemkeeperError {
    /// Create an I/O error
    pub fn io(operation: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }

    /// Create a JSON parse error
    pub fn json_parse(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::JsonParse {
            context: context.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create an invalid setting error
    pub fn invalid_setting(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidSetting {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a start failure error
    pub fn start_failed(name: impl Into<String>, exit_code: i32) -> Self {
        Self::StartFailed {
            name: name.into(),
            exit_code,
        }
    }

    /// Create a worker unavailable error
    pub fn worker_unavailable(endpoint: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::WorkerUnavailable {
            endpoint: endpoint.into(),
            elapsed_ms,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    // =========================================================================
    // Error classification helpers
    // =========================================================================

    /// Returns true if this is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigInvalid { .. } | Self::ConfigValidation { .. } | Self::InvalidSetting { .. }
        )
    }

    /// Returns true if the worker process could not be launched
    pub fn is_start_error(&self) -> bool {
        matches!(
            self,
            Self::StartFailed { .. } | Self::StartTimeout { .. } | Self::SupervisorUnavailable { .. }
        )
    }

    /// Returns true if a deadline expired
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::WorkerUnavailable { .. } | Self::StartTimeout { .. })
    }

    /// Returns actionable guidance for the user
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            Self::InvalidSetting { .. } => {
                Some("Fix the value in ~/.claude-mem/settings.json or unset the environment override")
            }
            Self::SupervisorUnavailable { .. } => {
                Some("Install pm2 (npm install -g pm2) or pass --pm2 with its path")
            }
            Self::StartFailed { .. } => Some("Run 'pm2 logs' to see why the worker failed to start"),
            Self::WorkerUnavailable { .. } => {
                Some("Check the worker logs; slow machines can raise --max-wait-ms")
            }
            _ => None,
        }
    }
}
