//! Scripted stand-ins for the worker and its process manager.
//!
//! [`MockProbe`] answers like a worker that comes up at a chosen moment and
//! [`MockSupervisor`] records every call it receives. Wiring the supervisor
//! to the probe with [`MockSupervisor::boots`] makes a start call bring the
//! simulated worker up after a delay, which lets the full lifecycle run on
//! tokio's paused clock without a network or a subprocess.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use memkeeper_core::types::{
    ExitOutcome, HealthState, ManagedProcessRecord, UNKNOWN_VERSION, WorkerEndpoint,
};
use memkeeper_core::{MemkeeperError, Result};
use tokio::time::Instant;

use crate::health::{ReadinessState, WorkerProbe};
use crate::supervisor::{ProcessSpec, ProcessSupervisor};

#[derive(Debug, Default)]
struct ProbeState {
    healthy_at: Option<Instant>,
    timeouts_seen: Vec<Duration>,
}

/// Worker stand-in.
///
/// While unhealthy, each liveness probe consumes its whole timeout, like a
/// request to a host that never answers.
#[derive(Debug)]
pub struct MockProbe {
    state: Mutex<ProbeState>,
    readiness: ReadinessState,
    version: Option<String>,
}

impl MockProbe {
    /// A worker that is already up.
    pub fn healthy() -> Self {
        let probe = Self::unreachable();
        probe.lock().healthy_at = Some(Instant::now());
        probe
    }

    /// A worker that is down until told otherwise.
    pub fn unreachable() -> Self {
        Self {
            state: Mutex::new(ProbeState::default()),
            readiness: ReadinessState::Ready,
            version: Some(UNKNOWN_VERSION.to_string()),
        }
    }

    /// Report this readiness state whenever the worker is live.
    pub fn with_readiness(mut self, readiness: ReadinessState) -> Self {
        self.readiness = readiness;
        self
    }

    /// Report this version whenever the worker is live. `None` simulates a
    /// failed version request.
    pub fn with_version(mut self, version: Option<&str>) -> Self {
        self.version = version.map(str::to_string);
        self
    }

    /// Schedule the worker to come up `delay` from now, unless it already is.
    pub fn becomes_healthy_after(&self, delay: Duration) {
        let mut state = self.lock();
        let at = Instant::now() + delay;
        state.healthy_at = Some(match state.healthy_at {
            Some(existing) if existing <= at => existing,
            _ => at,
        });
    }

    /// Number of liveness probes received.
    pub fn probe_count(&self) -> usize {
        self.lock().timeouts_seen.len()
    }

    /// Timeout passed with each liveness probe, in order.
    pub fn timeouts_seen(&self) -> Vec<Duration> {
        self.lock().timeouts_seen.clone()
    }

    fn is_up(&self) -> bool {
        self.lock()
            .healthy_at
            .is_some_and(|at| Instant::now() >= at)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl WorkerProbe for MockProbe {
    async fn liveness(&self, _endpoint: &WorkerEndpoint, timeout: Duration) -> HealthState {
        self.lock().timeouts_seen.push(timeout);

        if self.is_up() {
            return HealthState::Healthy;
        }

        tokio::time::sleep(timeout).await;
        HealthState::Unreachable {
            reason: format!("timed out after {}ms", timeout.as_millis()),
        }
    }

    async fn readiness(&self, _endpoint: &WorkerEndpoint, _timeout: Duration) -> ReadinessState {
        if self.is_up() {
            self.readiness.clone()
        } else {
            ReadinessState::Unreachable {
                reason: "connection refused".into(),
            }
        }
    }

    async fn remote_version(&self, _endpoint: &WorkerEndpoint, _timeout: Duration) -> Option<String> {
        if self.is_up() {
            self.version.clone()
        } else {
            None
        }
    }
}

/// How [`MockSupervisor::list`] answers.
#[derive(Debug, Clone)]
enum ListBehavior {
    Records(Vec<ManagedProcessRecord>),
    NotInstalled,
}

/// How [`MockSupervisor::start`] answers.
#[derive(Debug, Clone, Copy)]
enum StartBehavior {
    Exit(ExitOutcome),
    NotInstalled,
}

/// Process manager stand-in that records calls.
#[derive(Debug)]
pub struct MockSupervisor {
    list: ListBehavior,
    start: StartBehavior,
    boots: Option<(Arc<MockProbe>, Duration)>,
    list_calls: Mutex<usize>,
    started: Mutex<Vec<ProcessSpec>>,
}

impl Default for MockSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSupervisor {
    /// Empty listing; every start exits 0.
    pub fn new() -> Self {
        Self {
            list: ListBehavior::Records(Vec::new()),
            start: StartBehavior::Exit(ExitOutcome::Success),
            boots: None,
            list_calls: Mutex::new(0),
            started: Mutex::new(Vec::new()),
        }
    }

    /// Listing returns these records.
    pub fn with_records(mut self, records: Vec<ManagedProcessRecord>) -> Self {
        self.list = ListBehavior::Records(records);
        self
    }

    /// Every call fails as if the process manager binary were missing.
    pub fn not_installed(mut self) -> Self {
        self.list = ListBehavior::NotInstalled;
        self.start = StartBehavior::NotInstalled;
        self
    }

    /// Listing fails but starting works.
    pub fn with_failing_list(mut self) -> Self {
        self.list = ListBehavior::NotInstalled;
        self
    }

    /// Start calls report this outcome.
    pub fn with_start_outcome(mut self, outcome: ExitOutcome) -> Self {
        self.start = StartBehavior::Exit(outcome);
        self
    }

    /// A non-failing start brings `probe` up after `delay`.
    pub fn boots(mut self, probe: Arc<MockProbe>, delay: Duration) -> Self {
        self.boots = Some((probe, delay));
        self
    }

    pub fn list_calls(&self) -> usize {
        *self.list_calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn start_calls(&self) -> usize {
        self.started.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Specs passed to start, in order.
    pub fn started_specs(&self) -> Vec<ProcessSpec> {
        self.started.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ProcessSupervisor for MockSupervisor {
    async fn list(&self) -> Result<Vec<ManagedProcessRecord>> {
        *self.list_calls.lock().unwrap_or_else(|e| e.into_inner()) += 1;

        match &self.list {
            ListBehavior::Records(records) => Ok(records.clone()),
            ListBehavior::NotInstalled => Err(MemkeeperError::SupervisorUnavailable {
                program: "mock".into(),
                message: "not installed".into(),
            }),
        }
    }

    async fn start(&self, spec: &ProcessSpec) -> Result<ExitOutcome> {
        self.started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(spec.clone());

        let outcome = match self.start {
            StartBehavior::Exit(outcome) => outcome,
            StartBehavior::NotInstalled => {
                return Err(MemkeeperError::SupervisorUnavailable {
                    program: "mock".into(),
                    message: "not installed".into(),
                });
            }
        };

        if !outcome.is_failure() {
            if let Some((probe, delay)) = &self.boots {
                probe.becomes_healthy_after(*delay);
            }
        }

        Ok(outcome)
    }

    fn name(&self) -> &str {
        "mock"
    }
}
