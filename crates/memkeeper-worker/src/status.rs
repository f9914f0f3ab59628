//! Point-in-time worker status, as shown by the dashboard's status panel.

use chrono::{DateTime, Utc};
use memkeeper_core::types::{HealthState, ManagedProcessRecord, VersionOutcome, VersionPair, WorkerEndpoint};
use serde::Serialize;

use crate::health::ReadinessState;

/// Snapshot built by [`crate::WorkerManager::status`].
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Process name the worker runs under
    pub worker: String,
    pub endpoint: WorkerEndpoint,
    pub liveness: HealthState,
    pub readiness: ReadinessState,
    pub versions: VersionPair,
    pub version_outcome: VersionOutcome,
    /// `None` when the process manager could not be queried
    pub processes: Option<Vec<ManagedProcessRecord>>,
    pub checked_at: DateTime<Utc>,
}

impl StatusReport {
    /// Process manager's view of the worker, if it listed it.
    pub fn worker_process(&self) -> Option<&ManagedProcessRecord> {
        self.processes
            .as_ref()
            .and_then(|records| records.iter().find(|r| r.name == self.worker))
    }

    /// Human-readable multi-line summary.
    pub fn to_summary(&self) -> String {
        let process = match (&self.processes, self.worker_process()) {
            (None, _) => "process manager unavailable".to_string(),
            (Some(_), None) => "not listed".to_string(),
            (Some(_), Some(record)) => record.status.to_string(),
        };

        format!(
            "Worker:    {} ({})\nLiveness:  {}\nReadiness: {}\nVersion:   local {} / worker {} ({})\nProcess:   {}",
            self.worker,
            self.endpoint,
            self.liveness,
            self.readiness,
            self.versions.local,
            self.versions.remote,
            self.version_outcome,
            process,
        )
    }
}
