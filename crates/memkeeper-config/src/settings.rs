//! File-backed settings source with environment overrides.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use memkeeper_core::logging::default_data_dir;
use memkeeper_core::{MemkeeperError, Result};
use serde_json::Value;
use tracing::{debug, warn};

/// Worker port setting.
pub const WORKER_PORT_KEY: &str = "CLAUDE_MEM_WORKER_PORT";

/// Worker host setting.
pub const WORKER_HOST_KEY: &str = "CLAUDE_MEM_WORKER_HOST";

/// One-shot health check timeout override, in milliseconds.
pub const HEALTH_TIMEOUT_KEY: &str = "CLAUDE_MEM_HEALTH_TIMEOUT_MS";

/// Settings file name inside the data directory.
pub const SETTINGS_FILE_NAME: &str = "settings.json";

const KNOWN_KEYS: [&str; 3] = [WORKER_PORT_KEY, WORKER_HOST_KEY, HEALTH_TIMEOUT_KEY];

/// Where settings come from: an optional JSON file plus a snapshot of
/// environment overrides.
///
/// The environment is captured at construction, so a source built in a test
/// never observes the real process environment.
#[derive(Debug, Clone, Default)]
pub struct SettingsSource {
    path: Option<PathBuf>,
    env: HashMap<String, String>,
}

impl SettingsSource {
    /// Source backed by a settings file, with no environment overrides.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            env: HashMap::new(),
        }
    }

    /// Source with no file at all; only overrides and defaults apply.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Source for the real process: `<data dir>/settings.json` plus whatever
    /// relevant variables are set in the environment.
    ///
    /// `data_dir` wins over `CLAUDE_MEM_DATA_DIR`, which wins over `~/.claude-mem`.
    /// Variables set to a blank value count as unset.
    pub fn from_process_env(data_dir: Option<PathBuf>) -> Self {
        let data_dir = match data_dir {
            Some(dir) => Some(dir),
            None => default_data_dir()
                .inspect_err(|e| warn!(error = %e, "no data directory, reading no settings file"))
                .ok(),
        };

        let env = KNOWN_KEYS
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|value| (key.to_string(), value)))
            .filter(|(_, value)| !value.trim().is_empty())
            .collect();

        Self {
            path: data_dir.map(|dir| dir.join(SETTINGS_FILE_NAME)),
            env,
        }
    }

    /// Add an environment override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Path of the backing settings file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read and merge every setting: environment over file.
    ///
    /// A missing or unparseable file is not an error. Callers get whatever
    /// overrides exist and fall back to defaults for the rest. Blank values,
    /// from either layer, are dropped as if they were never set.
    pub fn load(&self) -> HashMap<String, String> {
        let mut values = match &self.path {
            Some(path) => read_settings_file(path),
            None => HashMap::new(),
        };

        for (key, value) in &self.env {
            if !value.trim().is_empty() {
                values.insert(key.clone(), value.clone());
            }
        }

        values.retain(|_, value| !value.trim().is_empty());
        values
    }
}

fn read_settings_file(path: &Path) -> HashMap<String, String> {
    match parse_settings_file(path) {
        Ok(values) => values,
        Err(MemkeeperError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "settings file not found, using defaults");
            HashMap::new()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "settings file unusable, using defaults");
            HashMap::new()
        }
    }
}

/// Parse a flat settings object. Scalars are kept as their string form;
/// nested values are ignored.
fn parse_settings_file(path: &Path) -> Result<HashMap<String, String>> {
    let content =
        std::fs::read_to_string(path).map_err(|e| MemkeeperError::io("reading settings", path, e))?;

    let raw: HashMap<String, Value> =
        serde_json::from_str(&content).map_err(|e| MemkeeperError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    Ok(raw
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::String(s) => Some((key, s)),
            Value::Number(n) => Some((key, n.to_string())),
            Value::Bool(b) => Some((key, b.to_string())),
            _ => None,
        })
        .collect())
}
