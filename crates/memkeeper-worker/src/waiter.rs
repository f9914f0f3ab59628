//! Bounded polling until the worker answers its liveness probe.
//!
//! Polling is fixed-cadence with no backoff. Each probe gets a short
//! deadline of its own so that an unreachable worker is noticed quickly,
//! while the overall wait budget stays long enough for a cold start.

use std::time::Duration;

use memkeeper_core::types::WorkerEndpoint;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::health::WorkerProbe;

/// Default delay between probes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default per-probe deadline inside the polling loop.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(300);

/// What a wait observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WaitReport {
    pub healthy: bool,
    pub attempts: u32,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Polls a [`WorkerProbe`] until it reports healthy or the budget runs out.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessWaiter {
    interval: Duration,
    probe_timeout: Duration,
}

impl Default for ReadinessWaiter {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT)
    }
}

impl ReadinessWaiter {
    pub fn new(interval: Duration, probe_timeout: Duration) -> Self {
        Self {
            interval,
            probe_timeout,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// True as soon as one probe succeeds; false once `max_wait` has elapsed.
    pub async fn wait_until_healthy(
        &self,
        probe: &dyn WorkerProbe,
        endpoint: &WorkerEndpoint,
        max_wait: Duration,
    ) -> bool {
        self.wait(probe, endpoint, max_wait).await.healthy
    }

    /// Like [`ReadinessWaiter::wait_until_healthy`] but reports attempts and elapsed time.
    ///
    /// Neither a probe nor a sleep is allowed to run past the budget, so the
    /// call returns within `max_wait` plus scheduling slack.
    #[instrument(level = "debug", skip(self, probe), fields(endpoint = %endpoint, max_wait_ms = max_wait.as_millis() as u64))]
    pub async fn wait(
        &self,
        probe: &dyn WorkerProbe,
        endpoint: &WorkerEndpoint,
        max_wait: Duration,
    ) -> WaitReport {
        let started = Instant::now();
        let deadline = started + max_wait;
        let mut attempts = 0u32;

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            let probe_timeout = self.probe_timeout.min(deadline - now);
            attempts += 1;
            if probe.is_healthy(endpoint, probe_timeout).await {
                let elapsed = started.elapsed();
                debug!(attempts, elapsed_ms = elapsed.as_millis() as u64, "worker became healthy");
                return WaitReport {
                    healthy: true,
                    attempts,
                    elapsed,
                };
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.interval.min(deadline - now)).await;
        }

        let elapsed = started.elapsed();
        debug!(attempts, elapsed_ms = elapsed.as_millis() as u64, "wait budget exhausted");
        WaitReport {
            healthy: false,
            attempts,
            elapsed,
        }
    }
}
