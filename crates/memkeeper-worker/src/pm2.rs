//! pm2 adapter for [`ProcessSupervisor`].
//!
//! Listing uses `pm2 jlist`, which prints the process table as a JSON array.
//! Starting uses `pm2 start`, which may detach its daemon on the first run;
//! all of its stdio is discarded so a daemon that inherits the handles can
//! never keep this process waiting on a pipe.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use memkeeper_core::types::{ExitOutcome, ManagedProcessRecord, ProcessStatus};
use memkeeper_core::{MemkeeperError, Result};
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::supervisor::{LaunchCommand, ProcessSpec, ProcessSupervisor};

/// Default deadline for `pm2 jlist`.
pub const DEFAULT_LIST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default deadline for `pm2 start`.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(30);

/// Drives the `pm2` command line.
#[derive(Debug, Clone)]
pub struct Pm2Supervisor {
    program: PathBuf,
    cwd: Option<PathBuf>,
    list_timeout: Duration,
    start_timeout: Duration,
}

impl Default for Pm2Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Pm2Supervisor {
    /// Use `pm2` from `PATH`.
    pub fn new() -> Self {
        Self::with_program("pm2")
    }

    /// Use a specific pm2 executable.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            cwd: None,
            list_timeout: DEFAULT_LIST_TIMEOUT,
            start_timeout: DEFAULT_START_TIMEOUT,
        }
    }

    /// Prefer the package-local `node_modules/.bin/pm2`, falling back to `PATH`.
    pub fn for_package(package_root: &Path) -> Self {
        let local = package_root.join("node_modules").join(".bin").join("pm2");
        let mut supervisor = if local.exists() {
            Self::with_program(local)
        } else {
            debug!(root = %package_root.display(), "no package-local pm2, using PATH");
            Self::new()
        };
        supervisor.cwd = Some(package_root.to_path_buf());
        supervisor
    }

    pub fn with_list_timeout(mut self, timeout: Duration) -> Self {
        self.list_timeout = timeout;
        self
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    fn unavailable(&self, message: impl Into<String>) -> MemkeeperError {
        MemkeeperError::SupervisorUnavailable {
            program: self.program_name(),
            message: message.into(),
        }
    }
}

/// Arguments for `pm2 start`.
pub fn start_args(spec: &ProcessSpec) -> Vec<String> {
    match &spec.command {
        LaunchCommand::Ecosystem { path } => {
            vec!["start".into(), path.display().to_string()]
        }
        LaunchCommand::Script { program, args } => {
            let mut argv = vec![
                "start".to_string(),
                program.clone(),
                "--name".to_string(),
                spec.name.clone(),
            ];
            if !args.is_empty() {
                argv.push("--".into());
                argv.extend(args.iter().cloned());
            }
            argv
        }
    }
}

#[derive(Debug, Deserialize)]
struct JlistEntry {
    name: String,
    #[serde(default)]
    pm2_env: Option<JlistEnv>,
}

#[derive(Debug, Deserialize)]
struct JlistEnv {
    #[serde(default)]
    status: Option<String>,
}

/// Parse `pm2 jlist` output.
///
/// pm2 sometimes prints banners or update notices (which contain brackets of
/// their own) before the array, so each `[` is tried as the start of the
/// table until one parses. Empty output is an empty table.
pub fn parse_jlist(output: &str) -> Result<Vec<ManagedProcessRecord>> {
    if output.trim().is_empty() {
        return Ok(Vec::new());
    }

    let Some(end) = output.rfind(']') else {
        return Err(MemkeeperError::SupervisorOutput {
            message: format!("no process list in pm2 output: {}", output.trim()),
        });
    };

    let mut last_error = None;
    for (start, _) in output[..end].match_indices('[') {
        match serde_json::from_str::<Vec<JlistEntry>>(&output[start..=end]) {
            Ok(entries) => return Ok(entries.into_iter().map(into_record).collect()),
            Err(e) => last_error = Some(e),
        }
    }

    match last_error {
        Some(e) => Err(MemkeeperError::json_parse("pm2 jlist", e)),
        None => Err(MemkeeperError::SupervisorOutput {
            message: format!("no process list in pm2 output: {}", output.trim()),
        }),
    }
}

fn into_record(entry: JlistEntry) -> ManagedProcessRecord {
    let status = entry
        .pm2_env
        .and_then(|env| env.status)
        .map(|s| ProcessStatus::parse(&s))
        .unwrap_or_default();
    ManagedProcessRecord::new(entry.name, status)
}

#[async_trait]
impl ProcessSupervisor for Pm2Supervisor {
    #[instrument(level = "debug", skip_all, fields(program = %self.program.display()))]
    async fn list(&self) -> Result<Vec<ManagedProcessRecord>> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("jlist").stdin(Stdio::null()).kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let output = match timeout(self.list_timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(self.unavailable(format!("failed to run jlist: {}", e))),
            Err(_) => {
                return Err(self.unavailable(format!(
                    "jlist timed out after {}ms",
                    self.list_timeout.as_millis()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MemkeeperError::SupervisorOutput {
                message: format!("jlist exited with {}: {}", output.status, stderr.trim()),
            });
        }

        let records = parse_jlist(&String::from_utf8_lossy(&output.stdout))?;
        debug!(count = records.len(), "pm2 processes listed");
        Ok(records)
    }

    #[instrument(level = "info", skip_all, fields(name = %spec.name))]
    async fn start(&self, spec: &ProcessSpec) -> Result<ExitOutcome> {
        let args = start_args(spec);

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .current_dir(&spec.working_dir)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        info!(program = %self.program.display(), args = ?args, "starting worker via pm2");

        let status = match timeout(self.start_timeout, cmd.status()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(self.unavailable(format!("failed to run start: {}", e))),
            Err(_) => {
                return Err(MemkeeperError::StartTimeout {
                    name: spec.name.clone(),
                    timeout_ms: self.start_timeout.as_millis() as u64,
                });
            }
        };

        let outcome = ExitOutcome::from_code(status.code());
        match outcome {
            ExitOutcome::Success => debug!("pm2 start exited cleanly"),
            ExitOutcome::IndeterminateButLikelySuccess => {
                warn!(status = %status, "pm2 start ended without an exit code, assuming it detached");
            }
            ExitOutcome::Failure(code) => warn!(code, "pm2 start failed"),
        }

        Ok(outcome)
    }

    fn name(&self) -> &str {
        "pm2"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_jlist() {
        let output = r#"[
            {"pid": 4242, "name": "claude-mem-worker", "pm_id": 0, "pm2_env": {"status": "online"}},
            {"pid": 0, "name": "old-app", "pm_id": 1, "pm2_env": {"status": "stopped"}},
            {"pid": 0, "name": "crashy", "pm_id": 2, "pm2_env": {"status": "errored"}},
            {"pid": 0, "name": "booting", "pm_id": 3, "pm2_env": {"status": "launching"}},
            {"name": "bare"}
        ]"#;

        let records = parse_jlist(output).unwrap();
        assert_eq!(
            records,
            vec![
                ManagedProcessRecord::new("claude-mem-worker", ProcessStatus::Online),
                ManagedProcessRecord::new("old-app", ProcessStatus::Stopped),
                ManagedProcessRecord::new("crashy", ProcessStatus::Errored),
                ManagedProcessRecord::new("booting", ProcessStatus::Unknown),
                ManagedProcessRecord::new("bare", ProcessStatus::Unknown),
            ]
        );
    }

    #[test]
    fn test_parse_jlist_with_banner() {
        let output = "[PM2] Spawning PM2 daemon with pm2_home=/home/u/.pm2\n[PM2] PM2 Successfully daemonized\n[]";
        assert!(parse_jlist(output).unwrap().is_empty());

        let output = ">>>> In-memory PM2 is out-of-date, do:\n>>>> $ pm2 update\n[{\"name\":\"w\",\"pm2_env\":{\"status\":\"online\"}}]";
        let records = parse_jlist(output).unwrap();
        assert_eq!(records, vec![ManagedProcessRecord::new("w", ProcessStatus::Online)]);
    }

    #[test]
    fn test_parse_jlist_empty() {
        assert!(parse_jlist("").unwrap().is_empty());
        assert!(parse_jlist("[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_jlist_garbage() {
        assert!(matches!(
            parse_jlist("command not found"),
            Err(MemkeeperError::SupervisorOutput { .. })
        ));
        assert!(matches!(
            parse_jlist("[not json]"),
            Err(MemkeeperError::JsonParse { .. })
        ));
    }

    #[test]
    fn test_start_args_ecosystem() {
        let spec = ProcessSpec::ecosystem("claude-mem-worker", "/opt/pkg");
        assert_eq!(start_args(&spec), vec!["start", "/opt/pkg/ecosystem.config.cjs"]);
    }

    #[test]
    fn test_start_args_script() {
        let spec = ProcessSpec::script("w", "node", ["worker.js"], "/srv");
        assert_eq!(start_args(&spec), vec!["start", "node", "--name", "w", "--", "worker.js"]);

        let spec = ProcessSpec::script("w", "./worker", Vec::<String>::new(), "/srv");
        assert_eq!(start_args(&spec), vec!["start", "./worker", "--name", "w"]);
    }

    #[test]
    fn test_for_package_falls_back_to_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let supervisor = Pm2Supervisor::for_package(dir.path());
        assert_eq!(supervisor.program(), Path::new("pm2"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let supervisor = Pm2Supervisor::with_program("/nonexistent/pm2-binary");
        let err = supervisor.list().await.unwrap_err();
        assert!(matches!(err, MemkeeperError::SupervisorUnavailable { .. }));

        let spec = ProcessSpec::ecosystem("w", std::env::temp_dir());
        let err = supervisor.start(&spec).await.unwrap_err();
        assert!(err.is_start_error());
    }
}
