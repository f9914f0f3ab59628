//! Process-local cache of the worker's address.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use memkeeper_core::types::WorkerEndpoint;
use memkeeper_core::{MemkeeperError, Result};
use tracing::{debug, warn};

use crate::settings::{HEALTH_TIMEOUT_KEY, SettingsSource, WORKER_HOST_KEY, WORKER_PORT_KEY};

/// Default worker port.
pub const DEFAULT_WORKER_PORT: u16 = 37777;

/// Default worker host.
pub const DEFAULT_WORKER_HOST: &str = "127.0.0.1";

/// Default one-shot health check timeout.
pub const DEFAULT_HEALTH_TIMEOUT_MS: u64 = 3000;

/// Smallest accepted health timeout override.
pub const MIN_HEALTH_TIMEOUT_MS: u64 = 500;

/// Largest accepted health timeout override.
pub const MAX_HEALTH_TIMEOUT_MS: u64 = 300_000;

/// Everything resolved from one read of the settings source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub endpoint: WorkerEndpoint,
    /// Timeout for one-shot (non-polling) health and version requests
    pub health_timeout: Duration,
}

impl WorkerSettings {
    /// Resolve settings from merged key/value pairs. Blank values count as unset.
    pub fn from_values(values: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| values.get(key).filter(|value| !value.trim().is_empty());

        let port = resolve_port(get(WORKER_PORT_KEY))?;
        let host = resolve_host(get(WORKER_HOST_KEY))?;
        let health_timeout = resolve_health_timeout(get(HEALTH_TIMEOUT_KEY));

        Ok(Self {
            endpoint: WorkerEndpoint::new(host, port),
            health_timeout,
        })
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            endpoint: WorkerEndpoint::new(DEFAULT_WORKER_HOST, DEFAULT_WORKER_PORT),
            health_timeout: Duration::from_millis(DEFAULT_HEALTH_TIMEOUT_MS),
        }
    }
}

fn resolve_port(raw: Option<&String>) -> Result<u16> {
    let Some(raw) = raw else {
        debug!(default = DEFAULT_WORKER_PORT, "{WORKER_PORT_KEY} not set, using default");
        return Ok(DEFAULT_WORKER_PORT);
    };

    match raw.trim().parse::<u16>() {
        Ok(0) => Err(MemkeeperError::invalid_setting(
            WORKER_PORT_KEY,
            raw.as_str(),
            "port must be between 1 and 65535",
        )),
        Ok(port) => Ok(port),
        Err(e) => Err(MemkeeperError::invalid_setting(
            WORKER_PORT_KEY,
            raw.as_str(),
            format!("not a valid port number: {e}"),
        )),
    }
}

fn resolve_host(raw: Option<&String>) -> Result<String> {
    let Some(raw) = raw else {
        debug!(default = DEFAULT_WORKER_HOST, "{WORKER_HOST_KEY} not set, using default");
        return Ok(DEFAULT_WORKER_HOST.to_string());
    };

    let host = raw.trim();
    if host.is_empty() || host.chars().any(char::is_whitespace) || host.contains('/') {
        return Err(MemkeeperError::invalid_setting(
            WORKER_HOST_KEY,
            raw.as_str(),
            "expected a bare hostname or IP address",
        ));
    }

    Ok(host.to_string())
}

/// Out-of-range or unparsable overrides fall back to the default; never fatal.
fn resolve_health_timeout(raw: Option<&String>) -> Duration {
    let default = Duration::from_millis(DEFAULT_HEALTH_TIMEOUT_MS);
    let Some(raw) = raw else {
        return default;
    };

    match raw.trim().parse::<u64>() {
        Ok(ms) if (MIN_HEALTH_TIMEOUT_MS..=MAX_HEALTH_TIMEOUT_MS).contains(&ms) => {
            Duration::from_millis(ms)
        }
        _ => {
            warn!(
                value = %raw,
                min = MIN_HEALTH_TIMEOUT_MS,
                max = MAX_HEALTH_TIMEOUT_MS,
                "Invalid {HEALTH_TIMEOUT_KEY}, using default"
            );
            default
        }
    }
}

/// Resolves the worker's address once per process and caches it.
///
/// The cache is never refreshed behind the caller's back: a caller that
/// changes settings must call [`ConfigResolver::invalidate`] before the new
/// values are observed. Host, port and timeout are cached and cleared together.
#[derive(Debug)]
pub struct ConfigResolver {
    source: SettingsSource,
    cache: Mutex<Option<WorkerSettings>>,
}

impl ConfigResolver {
    pub fn new(source: SettingsSource) -> Self {
        Self {
            source,
            cache: Mutex::new(None),
        }
    }

    /// Resolver for the real process environment.
    pub fn from_process_env(data_dir: Option<std::path::PathBuf>) -> Self {
        Self::new(SettingsSource::from_process_env(data_dir))
    }

    /// Full settings, reading the source only on a cache miss.
    pub fn settings(&self) -> Result<WorkerSettings> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(settings) = cache.as_ref() {
            return Ok(settings.clone());
        }

        let settings = WorkerSettings::from_values(&self.source.load())?;
        debug!(
            endpoint = %settings.endpoint,
            health_timeout_ms = settings.health_timeout.as_millis() as u64,
            "worker settings resolved"
        );
        *cache = Some(settings.clone());
        Ok(settings)
    }

    /// The worker's host and port.
    pub fn resolve_endpoint(&self) -> Result<WorkerEndpoint> {
        Ok(self.settings()?.endpoint)
    }

    /// Timeout for one-shot health checks.
    pub fn health_timeout(&self) -> Result<Duration> {
        Ok(self.settings()?.health_timeout)
    }

    /// Drop the cached settings; the next access re-reads the source.
    pub fn invalidate(&self) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        *cache = None;
        debug!("worker settings cache cleared");
    }

    /// Whether a resolved value is currently cached.
    pub fn is_cached(&self) -> bool {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    pub fn source(&self) -> &SettingsSource {
        &self.source
    }
}
