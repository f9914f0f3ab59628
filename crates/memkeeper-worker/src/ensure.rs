//! The "make sure the worker is up" operation every client calls first.
//!
//! Callers are independent processes with no shared lock. Correctness under
//! overlapping calls comes from three things rather than mutual exclusion:
//!
//! 1. a fast liveness check, so nobody touches the process manager once the
//!    worker is up;
//! 2. the process manager tolerating a duplicate start of the same name;
//! 3. every caller polling on its own until the worker answers, whether or
//!    not it was the one that issued the start.
//!
//! ```text
//! CheckFastHealth --healthy-----------------> Done
//! CheckFastHealth --unhealthy---------------> CheckProcessList
//! CheckProcessList --online-----------------> WaitHealth
//! CheckProcessList --absent/unknown---------> StartProcess
//! StartProcess --success/indeterminate------> WaitHealth
//! StartProcess --failure(code)--------------> error (start)
//! WaitHealth --healthy within budget--------> Done
//! WaitHealth --budget exceeded--------------> error (timeout)
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use memkeeper_config::ConfigResolver;
use memkeeper_core::types::{ExitOutcome, WorkerEndpoint};
use memkeeper_core::{MemkeeperError, Result};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::health::WorkerProbe;
use crate::status::StatusReport;
use crate::supervisor::{ProcessSpec, ProcessSupervisor};
use crate::version::VersionReconciler;
use crate::waiter::{DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT, ReadinessWaiter};

/// Default deadline for the fast-path liveness check.
pub const DEFAULT_FAST_CHECK_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default budget for waiting on the worker to come up.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_millis(10_000);

/// Timing knobs for [`WorkerManager::ensure_available`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnsureOptions {
    pub fast_check_timeout: Duration,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub max_wait: Duration,
}

impl Default for EnsureOptions {
    fn default() -> Self {
        Self {
            fast_check_timeout: DEFAULT_FAST_CHECK_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

impl EnsureOptions {
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_fast_check_timeout(mut self, timeout: Duration) -> Self {
        self.fast_check_timeout = timeout;
        self
    }

    pub fn with_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.poll_timeout = timeout;
        self
    }

    /// Polling probes must time out strictly faster than the fast check,
    /// and neither the interval nor the budget may be zero. The check against
    /// the configured health timeout happens in
    /// [`WorkerManager::ensure_available`], once settings are resolved.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(MemkeeperError::ConfigValidation {
                message: "poll interval must be greater than zero".into(),
            });
        }
        if self.max_wait.is_zero() {
            return Err(MemkeeperError::ConfigValidation {
                message: "wait budget must be greater than zero".into(),
            });
        }
        if self.poll_timeout.is_zero() || self.poll_timeout >= self.fast_check_timeout {
            return Err(MemkeeperError::ConfigValidation {
                message: format!(
                    "poll timeout ({}ms) must be non-zero and shorter than the fast check timeout ({}ms)",
                    self.poll_timeout.as_millis(),
                    self.fast_check_timeout.as_millis()
                ),
            });
        }
        Ok(())
    }

    /// Polling probes must also time out strictly faster than the resolved
    /// one-shot health timeout.
    pub fn validate_against(&self, health_timeout: Duration) -> Result<()> {
        if self.poll_timeout >= health_timeout {
            return Err(MemkeeperError::ConfigValidation {
                message: format!(
                    "poll timeout ({}ms) must be shorter than the health check timeout ({}ms)",
                    self.poll_timeout.as_millis(),
                    health_timeout.as_millis()
                ),
            });
        }
        Ok(())
    }
}

/// How the worker came to be available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum EnsurePath {
    /// Fast check passed; the process manager was never consulted
    AlreadyHealthy,
    /// Process manager showed it online; we only waited
    AdoptedRunning,
    /// We issued the start command
    Started { exit: ExitOutcome },
}

/// Result of a successful [`WorkerManager::ensure_available`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnsureReport {
    pub endpoint: WorkerEndpoint,
    #[serde(flatten)]
    pub path: EnsurePath,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnsureState {
    CheckFastHealth,
    CheckProcessList,
    StartProcess,
    WaitHealth,
}

/// Composes settings, probe, process manager and waiter.
pub struct WorkerManager {
    resolver: Arc<ConfigResolver>,
    probe: Arc<dyn WorkerProbe>,
    supervisor: Arc<dyn ProcessSupervisor>,
    spec: ProcessSpec,
    options: EnsureOptions,
    versions: VersionReconciler,
}

impl std::fmt::Debug for WorkerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerManager")
            .field("supervisor", &self.supervisor.name())
            .field("spec", &self.spec)
            .field("options", &self.options)
            .finish()
    }
}

impl WorkerManager {
    /// Build a manager; rejects inconsistent options up front.
    pub fn new(
        resolver: Arc<ConfigResolver>,
        probe: Arc<dyn WorkerProbe>,
        supervisor: Arc<dyn ProcessSupervisor>,
        spec: ProcessSpec,
        options: EnsureOptions,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            resolver,
            probe,
            supervisor,
            spec,
            options,
            versions: VersionReconciler::default(),
        })
    }

    /// Compare versions against this reconciler instead of the compiled-in version.
    pub fn with_versions(mut self, versions: VersionReconciler) -> Self {
        self.versions = versions;
        self
    }

    pub fn options(&self) -> &EnsureOptions {
        &self.options
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    pub fn resolver(&self) -> &ConfigResolver {
        &self.resolver
    }

    /// Make sure the worker answers its liveness probe, starting it if needed.
    ///
    /// Issues at most one start command, and only after both the fast health
    /// check and the process listing say the worker is absent. Fails only
    /// when the start command genuinely fails or the wait budget runs out
    /// (or when the settings themselves are unusable, including a health
    /// timeout no longer than the polling timeout).
    #[instrument(level = "info", skip(self), fields(worker = %self.spec.name))]
    pub async fn ensure_available(&self) -> Result<EnsureReport> {
        let started = Instant::now();
        let settings = self.resolver.settings()?;
        self.options.validate_against(settings.health_timeout)?;
        let endpoint = settings.endpoint;
        let waiter = ReadinessWaiter::new(self.options.poll_interval, self.options.poll_timeout);

        let mut state = EnsureState::CheckFastHealth;
        let mut path = EnsurePath::AdoptedRunning;

        loop {
            debug!(state = ?state, "ensure_available step");
            state = match state {
                EnsureState::CheckFastHealth => {
                    if self
                        .probe
                        .is_healthy(&endpoint, self.options.fast_check_timeout)
                        .await
                    {
                        debug!(endpoint = %endpoint, "worker already healthy");
                        return Ok(self.report(endpoint, EnsurePath::AlreadyHealthy, started));
                    }
                    EnsureState::CheckProcessList
                }

                EnsureState::CheckProcessList => match self.supervisor.list().await {
                    Ok(records) if self.spec.is_online_in(&records) => {
                        info!("worker process online but not answering yet, waiting");
                        EnsureState::WaitHealth
                    }
                    Ok(_) => EnsureState::StartProcess,
                    Err(e) => {
                        warn!(
                            supervisor = self.supervisor.name(),
                            error = %e,
                            "process listing failed, assuming worker is not running"
                        );
                        EnsureState::StartProcess
                    }
                },

                EnsureState::StartProcess => {
                    info!(supervisor = self.supervisor.name(), "starting worker");
                    let exit = self.supervisor.start(&self.spec).await.inspect_err(|e| {
                        error!(error = %e, "could not run start command");
                    })?;

                    if let ExitOutcome::Failure(code) = exit {
                        error!(code, "start command failed");
                        return Err(MemkeeperError::start_failed(&self.spec.name, code));
                    }

                    path = EnsurePath::Started { exit };
                    EnsureState::WaitHealth
                }

                EnsureState::WaitHealth => {
                    let wait = waiter
                        .wait(self.probe.as_ref(), &endpoint, self.options.max_wait)
                        .await;

                    if wait.healthy {
                        info!(attempts = wait.attempts, "worker is healthy");
                        return Ok(self.report(endpoint, path, started));
                    }

                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    error!(
                        attempts = wait.attempts,
                        elapsed_ms, "worker did not become healthy in time"
                    );
                    return Err(MemkeeperError::worker_unavailable(endpoint.base_url(), elapsed_ms));
                }
            };
        }
    }

    fn report(&self, endpoint: WorkerEndpoint, path: EnsurePath, started: Instant) -> EnsureReport {
        EnsureReport {
            endpoint,
            path,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// One-shot liveness check using the configured health timeout.
    pub async fn is_healthy(&self) -> Result<bool> {
        let settings = self.resolver.settings()?;
        Ok(self
            .probe
            .is_healthy(&settings.endpoint, settings.health_timeout)
            .await)
    }

    /// Liveness, readiness, versions and process listing in one snapshot.
    ///
    /// Never starts anything.
    pub async fn status(&self) -> Result<StatusReport> {
        let settings = self.resolver.settings()?;
        let endpoint = settings.endpoint;
        let timeout = settings.health_timeout;

        let liveness = self.probe.liveness(&endpoint, timeout).await;
        let readiness = self.probe.readiness(&endpoint, timeout).await;
        let versions = self
            .versions
            .check_versions(self.probe.as_ref(), &endpoint, timeout)
            .await;
        let processes = match self.supervisor.list().await {
            Ok(records) => Some(records),
            Err(e) => {
                debug!(error = %e, "process listing unavailable for status report");
                None
            }
        };

        Ok(StatusReport {
            worker: self.spec.name.clone(),
            version_outcome: versions.outcome(),
            endpoint,
            liveness,
            readiness,
            versions,
            processes,
            checked_at: Utc::now(),
        })
    }
}
