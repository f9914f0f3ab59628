//! Shared type definitions for the worker data model.
//!
//! Everything here except [`WorkerEndpoint`] is computed fresh on each call
//! and never cached.

use serde::{Deserialize, Serialize};

/// Placeholder used whenever a version cannot be determined.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Network address of the worker service.
///
/// Host and port are always resolved together; there is no way to build a
/// half-populated endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerEndpoint {
    pub host: String,
    pub port: u16,
}

impl WorkerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Base URL such as `http://127.0.0.1:37777`. IPv6 literals are bracketed.
    pub fn base_url(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("http://[{}]:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }

    /// Full URL for a path on the worker. `path` may omit the leading slash.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url(), path)
        } else {
            format!("{}/{}", self.base_url(), path)
        }
    }
}

impl std::fmt::Display for WorkerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.base_url())
    }
}

/// Outcome of a single liveness probe.
///
/// Callers that only need a yes/no use [`HealthState::is_healthy`];
/// `Unhealthy` and `Unreachable` are kept apart for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HealthState {
    /// Worker answered with a 2xx status
    Healthy,
    /// Worker answered, but not with a 2xx status
    Unhealthy { status: u16 },
    /// No HTTP response at all (refused, DNS, deadline, other I/O)
    Unreachable { reason: String },
}

impl HealthState {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy { .. } => write!(f, "unhealthy"),
            Self::Unreachable { .. } => write!(f, "unreachable"),
        }
    }
}

/// Status of a process as reported by the process manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Online,
    Stopped,
    Errored,
    #[default]
    Unknown,
}

impl ProcessStatus {
    /// Map a process manager status string. Transitional states such as
    /// `launching` or `stopping` are `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "online" => Self::Online,
            "stopped" => Self::Stopped,
            "errored" => Self::Errored,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Stopped => write!(f, "stopped"),
            Self::Errored => write!(f, "errored"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One entry of the process manager's listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedProcessRecord {
    pub name: String,
    pub status: ProcessStatus,
}

impl ManagedProcessRecord {
    pub fn new(name: impl Into<String>, status: ProcessStatus) -> Self {
        Self {
            name: name.into(),
            status,
        }
    }

    /// True when this record is the named process and it is online.
    pub fn is_online(&self, name: &str) -> bool {
        self.name == name && self.status == ProcessStatus::Online
    }
}

/// Result of asking the process manager to start a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitOutcome {
    /// Exit code 0
    Success,
    /// A genuine non-zero exit code
    Failure(i32),
    /// No exit code at all, which daemonizing managers produce on success
    IndeterminateButLikelySuccess,
}

impl ExitOutcome {
    /// Classify a process exit code.
    pub fn from_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => Self::Success,
            Some(code) => Self::Failure(code),
            None => Self::IndeterminateButLikelySuccess,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

/// Comparison result of a [`VersionPair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionOutcome {
    Match,
    Mismatch,
    Unknown,
}

impl std::fmt::Display for VersionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Match => write!(f, "match"),
            Self::Mismatch => write!(f, "mismatch"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Caller's build version next to the worker's reported version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionPair {
    pub local: String,
    pub remote: String,
}

impl VersionPair {
    pub fn new(local: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
        }
    }

    /// `Unknown` whenever either side is empty or the placeholder.
    pub fn outcome(&self) -> VersionOutcome {
        if is_unknown(&self.local) || is_unknown(&self.remote) {
            VersionOutcome::Unknown
        } else if self.local.trim() == self.remote.trim() {
            VersionOutcome::Match
        } else {
            VersionOutcome::Mismatch
        }
    }
}

fn is_unknown(version: &str) -> bool {
    let version = version.trim();
    version.is_empty() || version.eq_ignore_ascii_case(UNKNOWN_VERSION)
}
