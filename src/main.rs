//! memkeeper - keeps the shared memory worker available
//!
//! Run from hooks before they talk to the worker. `ensure` is cheap when the
//! worker is already up and starts it through pm2 when it is not.
//!
//! ## Usage
//!
//! ```bash
//! # Make sure the worker is running (starting it if needed)
//! memkeeper ensure --cwd /path/to/plugin
//!
//! # One-shot liveness check
//! memkeeper health
//!
//! # Compare plugin and worker versions
//! memkeeper version --package-json /path/to/plugin/package.json
//!
//! # Full snapshot, machine readable
//! memkeeper status --json
//!
//! # With verbose logging
//! memkeeper -v ensure
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use memkeeper_config::ConfigResolver;
use memkeeper_core::{LogGuard, MemkeeperError, init_logging};
use memkeeper_worker::supervisor::DEFAULT_WORKER_NAME;
use memkeeper_worker::{
    EnsureOptions, HealthProbe, LocalVersion, Pm2Supervisor, ProcessSpec, VersionReconciler,
    WorkerManager, WorkerProbe,
};
use tracing::{debug, error, info};

/// Shared memory worker keeper
///
/// Checks the worker's health and lazily starts it through pm2.
#[derive(Parser, Debug)]
#[command(name = "memkeeper")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging (increases log level)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Directory for log files (defaults to <data dir>/logs/)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Worker data directory holding settings.json (defaults to ~/.claude-mem/)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Which worker process, and how pm2 reaches it.
#[derive(Args, Debug, Clone)]
struct WorkerArgs {
    /// pm2 executable (defaults to the package-local one, then PATH)
    #[arg(long)]
    pm2: Option<PathBuf>,

    /// Ecosystem file to start (defaults to <cwd>/ecosystem.config.cjs)
    #[arg(long)]
    ecosystem: Option<PathBuf>,

    /// Package root the worker is started from (defaults to the current directory)
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Process name the worker runs under
    #[arg(long, default_value = DEFAULT_WORKER_NAME)]
    name: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Make sure the worker answers, starting it if necessary
    Ensure {
        /// How long to wait for the worker after the fast check fails
        #[arg(long, default_value_t = 10_000)]
        max_wait_ms: u64,

        #[command(flatten)]
        worker: WorkerArgs,
    },

    /// Check worker liveness once
    Health {
        /// Probe deadline (defaults to CLAUDE_MEM_HEALTH_TIMEOUT_MS or 3000)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Compare the local version with the worker's
    Version {
        /// package.json to read the local version from (defaults to memkeeper's own)
        #[arg(long)]
        package_json: Option<PathBuf>,
    },

    /// Show liveness, readiness, versions and the pm2 listing
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        worker: WorkerArgs,
    },

    /// Print the resolved worker URL
    Endpoint,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match setup_logging(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::from(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start async runtime: {}", e);
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            error!("memkeeper error: {:#}", e);
            eprintln!("Error: {:#}", e);
            if let Some(hint) = e.downcast_ref::<MemkeeperError>().and_then(|e| e.guidance()) {
                eprintln!("Hint: {}", hint);
            }
            ExitCode::from(1)
        }
    }
}

/// Set up logging based on CLI arguments.
fn setup_logging(cli: &Cli) -> memkeeper_core::Result<LogGuard> {
    let log_dir = cli
        .log_dir
        .clone()
        .or_else(|| cli.data_dir.as_ref().map(|dir| dir.join("logs")));
    init_logging(log_dir, cli.verbose > 0)
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let resolver = Arc::new(ConfigResolver::from_process_env(cli.data_dir.clone()));
    let probe = Arc::new(HealthProbe::new()?);

    match cli.command {
        Command::Ensure {
            max_wait_ms,
            worker,
        } => {
            let options = EnsureOptions::default().with_max_wait(Duration::from_millis(max_wait_ms));
            let manager = worker_manager(resolver, probe, worker, options)?;

            let report = manager.ensure_available().await?;
            info!(endpoint = %report.endpoint, elapsed_ms = report.elapsed_ms, path = ?report.path, "worker available");
            println!("{}", report.endpoint);
            Ok(ExitCode::SUCCESS)
        }

        Command::Health { timeout_ms } => {
            let settings = resolver.settings()?;
            let timeout = timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(settings.health_timeout);

            let state = probe.liveness(&settings.endpoint, timeout).await;
            debug!(state = ?state, "health check finished");
            println!("{}", state);
            Ok(if state.is_healthy() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }

        Command::Version { package_json } => {
            let settings = resolver.settings()?;
            let local = match package_json {
                Some(path) => LocalVersion::PackageJson(path),
                None => LocalVersion::compiled(),
            };

            let pair = VersionReconciler::new(local)
                .check_versions(probe.as_ref(), &settings.endpoint, settings.health_timeout)
                .await;
            println!("local:   {}", pair.local);
            println!("worker:  {}", pair.remote);
            println!("outcome: {}", pair.outcome());
            Ok(ExitCode::SUCCESS)
        }

        Command::Status { json, worker } => {
            let manager = worker_manager(resolver, probe, worker, EnsureOptions::default())?;

            let report = manager.status().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.to_summary());
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Endpoint => {
            println!("{}", resolver.resolve_endpoint()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Build a manager for the worker process the flags describe.
fn worker_manager(
    resolver: Arc<ConfigResolver>,
    probe: Arc<HealthProbe>,
    args: WorkerArgs,
    options: EnsureOptions,
) -> anyhow::Result<WorkerManager> {
    let package_root = match args.cwd {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to read current directory")?,
    };

    let supervisor = match args.pm2 {
        Some(program) => Pm2Supervisor::with_program(program),
        None => Pm2Supervisor::for_package(&package_root),
    };

    let mut spec = ProcessSpec::ecosystem(args.name, &package_root);
    if let Some(file) = args.ecosystem {
        spec = spec.with_ecosystem_file(file);
    }

    Ok(WorkerManager::new(resolver, probe, Arc::new(supervisor), spec, options)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_ensure_defaults() {
        let cli = Cli::parse_from(["memkeeper", "ensure"]);
        match cli.command {
            Command::Ensure { max_wait_ms, worker } => {
                assert_eq!(max_wait_ms, 10_000);
                assert_eq!(worker.name, DEFAULT_WORKER_NAME);
                assert!(worker.pm2.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["memkeeper", "status", "--json", "-vv", "--data-dir", "/tmp/mem"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/mem")));
        assert!(matches!(cli.command, Command::Status { json: true, .. }));
    }

    #[test]
    fn test_status_targets_same_worker_as_ensure() {
        let cli = Cli::parse_from([
            "memkeeper",
            "status",
            "--name",
            "custom-worker",
            "--pm2",
            "/opt/pm2/bin/pm2",
            "--cwd",
            "/opt/claude-mem",
        ]);
        let Command::Status { json, worker } = cli.command else {
            panic!("expected status command");
        };
        assert!(!json);

        let manager = worker_manager(
            Arc::new(ConfigResolver::new(memkeeper_config::SettingsSource::empty())),
            Arc::new(HealthProbe::new().unwrap()),
            worker,
            EnsureOptions::default(),
        )
        .unwrap();

        assert_eq!(manager.spec().name, "custom-worker");
        assert_eq!(manager.spec().working_dir, PathBuf::from("/opt/claude-mem"));
        assert!(format!("{:?}", manager).contains("pm2"));
    }
}
