//! # memkeeper-core
//!
//! Core types, errors, and utilities shared by the memkeeper crates.
//!
//! This crate provides:
//! - [`MemkeeperError`] - Error type for every memkeeper operation
//! - [`logging`] - Tracing setup and log file helpers
//! - [`types`] - The worker data model (endpoint, health, process records, versions)
//!
//! ## Example
//!
//! ```no_run
//! use memkeeper_core::{logging, types::WorkerEndpoint};
//!
//! fn main() -> memkeeper_core::Result<()> {
//!     let _guard = logging::init_logging(None, false)?;
//!
//!     let endpoint = WorkerEndpoint::new("127.0.0.1", 37777);
//!     tracing::info!(url = %endpoint.base_url(), "worker endpoint");
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export main types for convenience
pub use error::{MemkeeperError, Result};
pub use logging::{LogGuard, init_logging};
pub use types::{
    ExitOutcome, HealthState, ManagedProcessRecord, ProcessStatus, VersionOutcome, VersionPair,
    WorkerEndpoint,
};
