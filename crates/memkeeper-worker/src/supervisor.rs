//! Process manager abstraction.
//!
//! memkeeper never owns the worker process. It asks an external process
//! manager what is running and, when the worker is absent, asks it to start
//! one. The manager is expected to treat a duplicate start of the same named
//! process as harmless, since uncoordinated callers may race to start it.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use memkeeper_core::Result;
use memkeeper_core::types::{ExitOutcome, ManagedProcessRecord};
use serde::{Deserialize, Serialize};

/// Default process name of the worker.
pub const DEFAULT_WORKER_NAME: &str = "claude-mem-worker";

/// Default ecosystem file launched by the process manager.
pub const DEFAULT_ECOSYSTEM_FILE: &str = "ecosystem.config.cjs";

/// What the process manager should run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LaunchCommand {
    /// A declarative process file that names the process itself
    Ecosystem { path: PathBuf },
    /// A program and its arguments
    Script { program: String, args: Vec<String> },
}

/// Declarative description of the worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Name the process manager lists the worker under
    pub name: String,
    pub command: LaunchCommand,
    pub working_dir: PathBuf,
    /// Extra environment for the start command
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ProcessSpec {
    /// Spec that launches an ecosystem file found in `package_root`.
    pub fn ecosystem(name: impl Into<String>, package_root: impl Into<PathBuf>) -> Self {
        let root = package_root.into();
        Self {
            name: name.into(),
            command: LaunchCommand::Ecosystem {
                path: root.join(DEFAULT_ECOSYSTEM_FILE),
            },
            working_dir: root,
            env: HashMap::new(),
        }
    }

    /// Spec that launches `program` with `args` under `name`.
    pub fn script(
        name: impl Into<String>,
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            command: LaunchCommand::Script {
                program: program.into(),
                args: args.into_iter().map(Into::into).collect(),
            },
            working_dir: working_dir.into(),
            env: HashMap::new(),
        }
    }

    /// Use a different ecosystem file.
    pub fn with_ecosystem_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.command = LaunchCommand::Ecosystem { path: path.into() };
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// True when some record shows this process online.
    pub fn is_online_in(&self, records: &[ManagedProcessRecord]) -> bool {
        records.iter().any(|record| record.is_online(&self.name))
    }
}

/// External process manager.
///
/// Implementations:
/// - [`crate::pm2::Pm2Supervisor`] drives the `pm2` CLI
/// - [`crate::mock::MockSupervisor`] records calls for tests
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Processes currently known to the manager.
    ///
    /// Fails when the manager is missing or its output is unreadable; callers
    /// treat that as "not confirmed running".
    async fn list(&self) -> Result<Vec<ManagedProcessRecord>>;

    /// Ask the manager to start `spec`.
    ///
    /// `Err` means the start command could not be run at all. A command that
    /// ran is reported through [`ExitOutcome`], including genuine failures.
    async fn start(&self, spec: &ProcessSpec) -> Result<ExitOutcome>;

    /// Manager name for logging.
    fn name(&self) -> &str;
}
