//! Worker availability for memkeeper.
//!
//! This crate makes sure the shared memory worker service is running before a
//! client talks to it, starting it through a process manager if necessary.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │    WorkerManager     │  ensure_available / status
//! └──┬────────┬──────────┘
//!    │        │
//!    ▼        ▼
//! ┌────────┐ ┌────────────────────┐
//! │ Config │ │ ProcessSupervisor  │  list / start (pm2)
//! │Resolver│ └────────────────────┘
//! └────────┘
//!    │
//!    ▼
//! ┌──────────────────────┐
//! │ ReadinessWaiter      │  fixed-cadence polling
//! │   └─ WorkerProbe     │  /api/health, /api/readiness, /api/version
//! └──────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use memkeeper_config::ConfigResolver;
//! use memkeeper_worker::{EnsureOptions, HealthProbe, Pm2Supervisor, ProcessSpec, WorkerManager};
//!
//! #[tokio::main]
//! async fn main() -> memkeeper_core::Result<()> {
//!     let package_root = Path::new("/opt/claude-mem");
//!
//!     let manager = WorkerManager::new(
//!         Arc::new(ConfigResolver::from_process_env(None)),
//!         Arc::new(HealthProbe::new()?),
//!         Arc::new(Pm2Supervisor::for_package(package_root)),
//!         ProcessSpec::ecosystem("claude-mem-worker", package_root),
//!         EnsureOptions::default(),
//!     )?;
//!
//!     let report = manager.ensure_available().await?;
//!     println!("worker ready at {} after {}ms", report.endpoint, report.elapsed_ms);
//!
//!     Ok(())
//! }
//! ```

pub mod ensure;
pub mod health;
pub mod mock;
pub mod pm2;
pub mod status;
pub mod supervisor;
pub mod version;
pub mod waiter;

// Re-export main types for convenience
pub use ensure::{EnsureOptions, EnsurePath, EnsureReport, WorkerManager};
pub use health::{HealthProbe, ReadinessState, WorkerProbe};
pub use pm2::Pm2Supervisor;
pub use status::StatusReport;
pub use supervisor::{LaunchCommand, ProcessSpec, ProcessSupervisor};
pub use version::{LocalVersion, VersionReconciler};
pub use waiter::{ReadinessWaiter, WaitReport};
