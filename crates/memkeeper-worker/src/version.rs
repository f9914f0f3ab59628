//! Compares the caller's build version with the running worker's.
//!
//! This is observation only. A mismatch is logged and returned; restarting
//! the worker on mismatch is someone else's job. Whenever either version
//! cannot be read the outcome is `Unknown` and nothing else happens, so a
//! package file caught mid-rewrite during an upgrade is never mistaken for a
//! real mismatch.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use memkeeper_core::types::{UNKNOWN_VERSION, VersionOutcome, VersionPair, WorkerEndpoint};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::health::WorkerProbe;

/// Where the caller's own version comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalVersion {
    /// A fixed version string
    Static(String),
    /// The `version` field of a package manifest (`package.json`)
    PackageJson(PathBuf),
}

impl LocalVersion {
    /// The version memkeeper itself was built as.
    pub fn compiled() -> Self {
        Self::Static(env!("CARGO_PKG_VERSION").to_string())
    }

    /// Read the version, or `"unknown"` if it cannot be determined.
    pub fn read(&self) -> String {
        match self {
            Self::Static(version) => version.clone(),
            Self::PackageJson(path) => read_package_version(path),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PackageManifest {
    version: Option<String>,
}

fn read_package_version(path: &Path) -> String {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ResourceBusy) => {
            debug!(path = %path.display(), kind = ?e.kind(), "package version unavailable (shutdown race)");
            return UNKNOWN_VERSION.to_string();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read package version");
            return UNKNOWN_VERSION.to_string();
        }
    };

    match serde_json::from_str::<PackageManifest>(&content) {
        Ok(PackageManifest {
            version: Some(version),
        }) if !version.trim().is_empty() => version,
        Ok(_) => {
            debug!(path = %path.display(), "package manifest has no version");
            UNKNOWN_VERSION.to_string()
        }
        // A truncated file during a rewrite lands here as well.
        Err(e) => {
            debug!(path = %path.display(), error = %e, "package manifest unreadable");
            UNKNOWN_VERSION.to_string()
        }
    }
}

/// Reports whether the caller and the worker run the same version.
#[derive(Debug, Clone)]
pub struct VersionReconciler {
    local: LocalVersion,
}

impl Default for VersionReconciler {
    fn default() -> Self {
        Self::new(LocalVersion::compiled())
    }
}

impl VersionReconciler {
    pub fn new(local: LocalVersion) -> Self {
        Self { local }
    }

    pub fn local(&self) -> &LocalVersion {
        &self.local
    }

    /// Read both versions. Never fails; unreadable sides become `"unknown"`.
    ///
    /// The worker is not contacted when the local version is already unknown.
    #[instrument(level = "debug", skip(self, probe), fields(endpoint = %endpoint))]
    pub async fn check_versions(
        &self,
        probe: &dyn WorkerProbe,
        endpoint: &WorkerEndpoint,
        timeout: Duration,
    ) -> VersionPair {
        let local = self.local.read();
        if local == UNKNOWN_VERSION {
            debug!("local version unknown, skipping version check");
            return VersionPair::new(local, UNKNOWN_VERSION);
        }

        let remote = probe
            .remote_version(endpoint, timeout)
            .await
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string());

        let pair = VersionPair::new(local, remote);
        match pair.outcome() {
            VersionOutcome::Match => debug!(version = %pair.local, "worker version matches"),
            VersionOutcome::Mismatch => info!(
                local = %pair.local,
                remote = %pair.remote,
                "worker version differs from caller; leaving restart to the worker's own start command"
            ),
            VersionOutcome::Unknown => debug!(remote = %pair.remote, "worker version unknown, skipping comparison"),
        }

        pair
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProbe;
    use std::fs;
    use tempfile::TempDir;

    fn endpoint() -> WorkerEndpoint {
        WorkerEndpoint::new("127.0.0.1", 37777)
    }

    #[test]
    fn test_package_json_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("package.json");
        fs::write(&path, r#"{"name": "claude-mem", "version": "9.0.12"}"#).unwrap();

        assert_eq!(LocalVersion::PackageJson(path).read(), "9.0.12");
    }

    #[test]
    fn test_missing_package_json_is_unknown() {
        let dir = TempDir::new().unwrap();
        let local = LocalVersion::PackageJson(dir.path().join("package.json"));
        assert_eq!(local.read(), UNKNOWN_VERSION);
    }

    #[test]
    fn test_truncated_package_json_is_unknown() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("package.json");
        fs::write(&path, r#"{"name": "claude-mem", "vers"#).unwrap();
        assert_eq!(LocalVersion::PackageJson(path.clone()).read(), UNKNOWN_VERSION);

        fs::write(&path, r#"{"name": "claude-mem"}"#).unwrap();
        assert_eq!(LocalVersion::PackageJson(path).read(), UNKNOWN_VERSION);
    }

    #[test]
    fn test_package_json_directory_is_unknown() {
        let dir = TempDir::new().unwrap();
        assert_eq!(LocalVersion::PackageJson(dir.path().to_path_buf()).read(), UNKNOWN_VERSION);
    }

    #[test]
    fn test_compiled_version() {
        assert_eq!(LocalVersion::compiled().read(), env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_matching_versions() {
        let probe = MockProbe::healthy().with_version(Some("9.0.12"));
        let reconciler = VersionReconciler::new(LocalVersion::Static("9.0.12".into()));

        let pair = reconciler
            .check_versions(&probe, &endpoint(), Duration::from_secs(1))
            .await;
        assert_eq!(pair.outcome(), VersionOutcome::Match);
    }

    #[tokio::test]
    async fn test_mismatch_is_reported() {
        let probe = MockProbe::healthy().with_version(Some("9.0.11"));
        let reconciler = VersionReconciler::new(LocalVersion::Static("9.0.12".into()));

        let pair = reconciler
            .check_versions(&probe, &endpoint(), Duration::from_secs(1))
            .await;
        assert_eq!(pair, VersionPair::new("9.0.12", "9.0.11"));
        assert_eq!(pair.outcome(), VersionOutcome::Mismatch);
    }

    #[tokio::test]
    async fn test_unknown_when_either_side_fails() {
        let reconciler = VersionReconciler::new(LocalVersion::Static("9.0.12".into()));

        // Worker down
        let probe = MockProbe::unreachable();
        let pair = reconciler
            .check_versions(&probe, &endpoint(), Duration::from_millis(10))
            .await;
        assert_eq!(pair.remote, UNKNOWN_VERSION);
        assert_eq!(pair.outcome(), VersionOutcome::Unknown);

        // Worker reports the placeholder
        let probe = MockProbe::healthy().with_version(Some("unknown"));
        let pair = reconciler
            .check_versions(&probe, &endpoint(), Duration::from_secs(1))
            .await;
        assert_eq!(pair.outcome(), VersionOutcome::Unknown);

        // Local manifest missing
        let dir = TempDir::new().unwrap();
        let reconciler =
            VersionReconciler::new(LocalVersion::PackageJson(dir.path().join("package.json")));
        let probe = MockProbe::healthy().with_version(Some("9.0.12"));
        let pair = reconciler
            .check_versions(&probe, &endpoint(), Duration::from_secs(1))
            .await;
        assert_eq!(pair.outcome(), VersionOutcome::Unknown);
    }
}
