//! HTTP probes against the worker.
//!
//! Every request carries an absolute deadline. No probe ever returns an
//! error: connection refusal, DNS failure, deadline expiry and any other I/O
//! problem all fold into a non-healthy state, because callers treat "don't
//! know" and "down" the same way.
//!
//! Liveness (`/api/health`) answers as soon as the worker's HTTP listener is
//! up. Readiness (`/api/readiness`) answers 503 until the worker has finished
//! warming its database and models, which can take minutes, so readiness is
//! only ever reported and never waited on.

use std::time::Duration;

use async_trait::async_trait;
use memkeeper_core::types::{HealthState, WorkerEndpoint};
use memkeeper_core::{MemkeeperError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Liveness endpoint.
pub const DEFAULT_HEALTH_PATH: &str = "/api/health";

/// Full-initialization endpoint.
pub const DEFAULT_READINESS_PATH: &str = "/api/readiness";

/// Version endpoint, answering `{"version": "..."}`.
pub const DEFAULT_VERSION_PATH: &str = "/api/version";

const USER_AGENT: &str = concat!("memkeeper/", env!("CARGO_PKG_VERSION"));

/// Worker initialization state as reported by the readiness endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReadinessState {
    Ready,
    /// Listener is up but initialization has not finished
    Initializing { status: u16 },
    Unreachable { reason: String },
}

impl ReadinessState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl std::fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Initializing { .. } => write!(f, "initializing"),
            Self::Unreachable { .. } => write!(f, "unreachable"),
        }
    }
}

/// Read-only view of the worker's HTTP surface.
///
/// Implementations:
/// - [`HealthProbe`] talks HTTP to a real worker
/// - [`crate::mock::MockProbe`] scripts answers for tests
#[async_trait]
pub trait WorkerProbe: Send + Sync {
    /// Classify the liveness endpoint within `timeout`.
    async fn liveness(&self, endpoint: &WorkerEndpoint, timeout: Duration) -> HealthState;

    /// Classify the readiness endpoint within `timeout`.
    async fn readiness(&self, endpoint: &WorkerEndpoint, timeout: Duration) -> ReadinessState;

    /// Version the worker reports, or `None` if it could not be fetched.
    async fn remote_version(&self, endpoint: &WorkerEndpoint, timeout: Duration) -> Option<String>;

    /// Boolean view of [`WorkerProbe::liveness`].
    async fn is_healthy(&self, endpoint: &WorkerEndpoint, timeout: Duration) -> bool {
        self.liveness(endpoint, timeout).await.is_healthy()
    }
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
}

/// HTTP implementation of [`WorkerProbe`].
#[derive(Debug, Clone)]
pub struct HealthProbe {
    client: reqwest::Client,
    health_path: String,
    readiness_path: String,
    version_path: String,
}

impl HealthProbe {
    /// Create a probe using the default endpoint paths.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| MemkeeperError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            readiness_path: DEFAULT_READINESS_PATH.to_string(),
            version_path: DEFAULT_VERSION_PATH.to_string(),
        })
    }

    /// Use a different liveness path, e.g. `/health` for older workers.
    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }

    pub fn health_path(&self) -> &str {
        &self.health_path
    }

    /// GET with a deadline that covers connect, headers, and nothing else.
    async fn get(&self, url: &str, timeout: Duration) -> std::result::Result<reqwest::Response, String> {
        let request = self.client.get(url).timeout(timeout).send();

        match tokio::time::timeout(timeout, request).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(describe_request_error(&e, timeout)),
            Err(_) => Err(format!("timed out after {}ms", timeout.as_millis())),
        }
    }
}

fn describe_request_error(e: &reqwest::Error, timeout: Duration) -> String {
    if e.is_timeout() {
        format!("timed out after {}ms", timeout.as_millis())
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    }
}

#[async_trait]
impl WorkerProbe for HealthProbe {
    #[instrument(level = "debug", skip(self), fields(endpoint = %endpoint, timeout_ms = timeout.as_millis() as u64))]
    async fn liveness(&self, endpoint: &WorkerEndpoint, timeout: Duration) -> HealthState {
        let state = match self.get(&endpoint.url(&self.health_path), timeout).await {
            Ok(response) if response.status().is_success() => HealthState::Healthy,
            Ok(response) => HealthState::Unhealthy {
                status: response.status().as_u16(),
            },
            Err(reason) => HealthState::Unreachable { reason },
        };

        debug!(state = %state, "liveness probe");
        state
    }

    async fn readiness(&self, endpoint: &WorkerEndpoint, timeout: Duration) -> ReadinessState {
        match self.get(&endpoint.url(&self.readiness_path), timeout).await {
            Ok(response) if response.status().is_success() => ReadinessState::Ready,
            Ok(response) => ReadinessState::Initializing {
                status: response.status().as_u16(),
            },
            Err(reason) => ReadinessState::Unreachable { reason },
        }
    }

    async fn remote_version(&self, endpoint: &WorkerEndpoint, timeout: Duration) -> Option<String> {
        let url = endpoint.url(&self.version_path);
        let fetch = async {
            let response = self
                .client
                .get(&url)
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| describe_request_error(&e, timeout))?;

            if !response.status().is_success() {
                return Err(format!("version endpoint returned {}", response.status()));
            }

            response
                .json::<VersionResponse>()
                .await
                .map(|body| body.version)
                .map_err(|e| format!("invalid version response: {}", e))
        };

        match tokio::time::timeout(timeout, fetch).await {
            Ok(Ok(version)) => Some(version),
            Ok(Err(reason)) => {
                debug!(url = %url, reason = %reason, "could not fetch worker version");
                None
            }
            Err(_) => {
                debug!(url = %url, timeout_ms = timeout.as_millis() as u64, "worker version request timed out");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

    fn endpoint_for(server: &MockServer) -> WorkerEndpoint {
        let addr = server.address();
        WorkerEndpoint::new(addr.ip().to_string(), addr.port())
    }

    /// An endpoint nothing listens on: bind an ephemeral port, then release it.
    fn unbound_endpoint() -> WorkerEndpoint {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        WorkerEndpoint::new("127.0.0.1", port)
    }

    #[tokio::test]
    async fn test_liveness_healthy_on_2xx() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/api/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})))
            .mount(&server)
            .await;

        let probe = HealthProbe::new().unwrap();
        let state = probe.liveness(&endpoint_for(&server), Duration::from_secs(1)).await;
        assert_eq!(state, HealthState::Healthy);
        assert!(probe.is_healthy(&endpoint_for(&server), Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_liveness_204_counts_as_healthy() {
        let server = MockServer::start().await;
        Mock::given(matchers::path("/api/health"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let probe = HealthProbe::new().unwrap();
        assert!(probe.is_healthy(&endpoint_for(&server), Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_liveness_unhealthy_on_5xx() {
        let server = MockServer::start().await;
        Mock::given(matchers::path("/api/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let probe = HealthProbe::new().unwrap();
        let state = probe.liveness(&endpoint_for(&server), Duration::from_secs(1)).await;
        assert_eq!(state, HealthState::Unhealthy { status: 503 });
    }

    #[tokio::test]
    async fn test_custom_health_path() {
        let server = MockServer::start().await;
        Mock::given(matchers::path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let probe = HealthProbe::new().unwrap().with_health_path("/health");
        assert_eq!(probe.health_path(), "/health");
        assert!(probe.is_healthy(&endpoint_for(&server), Duration::from_secs(1)).await);

        // Default path is not served by this worker
        let default_probe = HealthProbe::new().unwrap();
        assert!(!default_probe.is_healthy(&endpoint_for(&server), Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_liveness_deadline_is_honored() {
        let server = MockServer::start().await;
        Mock::given(matchers::path("/api/health"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let probe = HealthProbe::new().unwrap();
        let started = Instant::now();
        let state = probe.liveness(&endpoint_for(&server), Duration::from_millis(300)).await;

        assert!(matches!(state, HealthState::Unreachable { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_liveness_unreachable_on_refused_connection() {
        let probe = HealthProbe::new().unwrap();
        let started = Instant::now();
        let state = probe.liveness(&unbound_endpoint(), Duration::from_millis(1000)).await;

        assert!(matches!(state, HealthState::Unreachable { .. }));
        assert!(started.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_zero_timeout_never_hangs() {
        let probe = HealthProbe::new().unwrap();
        let started = Instant::now();
        let healthy = probe.is_healthy(&unbound_endpoint(), Duration::ZERO).await;

        assert!(!healthy);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_readiness_states() {
        let server = MockServer::start().await;
        Mock::given(matchers::path("/api/readiness"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let probe = HealthProbe::new().unwrap();
        let state = probe.readiness(&endpoint_for(&server), Duration::from_secs(1)).await;
        assert_eq!(state, ReadinessState::Initializing { status: 503 });
        assert!(!state.is_ready());

        let state = probe.readiness(&unbound_endpoint(), Duration::from_millis(300)).await;
        assert!(matches!(state, ReadinessState::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_remote_version() {
        let server = MockServer::start().await;
        Mock::given(matchers::path("/api/version"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"version": "9.0.12"})))
            .mount(&server)
            .await;

        let probe = HealthProbe::new().unwrap();
        let version = probe.remote_version(&endpoint_for(&server), Duration::from_secs(1)).await;
        assert_eq!(version.as_deref(), Some("9.0.12"));
    }

    #[tokio::test]
    async fn test_remote_version_failures_are_none() {
        let server = MockServer::start().await;
        Mock::given(matchers::path("/api/version"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let probe = HealthProbe::new().unwrap();
        assert!(probe.remote_version(&endpoint_for(&server), Duration::from_secs(1)).await.is_none());
        assert!(probe.remote_version(&unbound_endpoint(), Duration::from_millis(300)).await.is_none());
    }
}
