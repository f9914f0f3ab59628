//! Settings resolution for memkeeper.
//!
//! The worker's address lives in `<data dir>/settings.json`, a flat JSON
//! object shared with every other client of the worker. Each key can be
//! overridden from the process environment:
//!
//! | Key                            | Default     | Notes                       |
//! |--------------------------------|-------------|-----------------------------|
//! | `CLAUDE_MEM_WORKER_PORT`       | `37777`     | invalid value is an error   |
//! | `CLAUDE_MEM_WORKER_HOST`       | `127.0.0.1` | malformed host is an error  |
//! | `CLAUDE_MEM_HEALTH_TIMEOUT_MS` | `3000`      | outside [500, 300000] falls back to the default |
//!
//! A key set to a blank value is treated as unset.
//!
//! [`ConfigResolver`] reads the source once and caches the result until
//! [`ConfigResolver::invalidate`] is called.

pub mod resolver;
pub mod settings;

pub use resolver::{ConfigResolver, WorkerSettings};
pub use settings::SettingsSource;
