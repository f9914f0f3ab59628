//! `Pm2Supervisor` against stand-in `pm2` shell scripts.

#![cfg(unix)]

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use memkeeper_core::MemkeeperError;
use memkeeper_core::types::{ExitOutcome, ProcessStatus};
use memkeeper_worker::{Pm2Supervisor, ProcessSpec, ProcessSupervisor};
use tempfile::TempDir;

fn fake_pm2(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("pm2");
    {
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(file, "{}", body).unwrap();
        file.sync_all().unwrap();
    }
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn spec(dir: &Path) -> ProcessSpec {
    ProcessSpec::ecosystem("claude-mem-worker", dir)
}

#[tokio::test]
async fn test_start_exit_zero_is_success() {
    let dir = TempDir::new().unwrap();
    let pm2 = Pm2Supervisor::with_program(fake_pm2(dir.path(), "exit 0"));

    assert_eq!(pm2.start(&spec(dir.path())).await.unwrap(), ExitOutcome::Success);
}

#[tokio::test]
async fn test_start_nonzero_exit_is_failure() {
    let dir = TempDir::new().unwrap();
    let pm2 = Pm2Supervisor::with_program(fake_pm2(dir.path(), "exit 1"));

    assert_eq!(pm2.start(&spec(dir.path())).await.unwrap(), ExitOutcome::Failure(1));
}

#[tokio::test]
async fn test_start_killed_by_signal_is_indeterminate() {
    let dir = TempDir::new().unwrap();
    let pm2 = Pm2Supervisor::with_program(fake_pm2(dir.path(), "kill -9 $$"));

    assert_eq!(
        pm2.start(&spec(dir.path())).await.unwrap(),
        ExitOutcome::IndeterminateButLikelySuccess
    );
}

#[tokio::test]
async fn test_start_receives_ecosystem_path_and_env() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("args.log");
    let body = format!(
        "echo \"$@ $MEMKEEPER_TEST\" > '{}'\nexit 0",
        log.display()
    );
    let pm2 = Pm2Supervisor::with_program(fake_pm2(dir.path(), &body));

    let spec = spec(dir.path()).with_env("MEMKEEPER_TEST", "marker");
    pm2.start(&spec).await.unwrap();

    let recorded = fs::read_to_string(&log).unwrap();
    let ecosystem = dir.path().join("ecosystem.config.cjs");
    assert_eq!(
        recorded.trim(),
        format!("start {} marker", ecosystem.display())
    );
}

#[tokio::test]
async fn test_start_timeout() {
    let dir = TempDir::new().unwrap();
    let pm2 = Pm2Supervisor::with_program(fake_pm2(dir.path(), "sleep 5"))
        .with_start_timeout(Duration::from_millis(200));

    let err = pm2.start(&spec(dir.path())).await.unwrap_err();
    assert!(matches!(err, MemkeeperError::StartTimeout { timeout_ms: 200, .. }));
}

#[tokio::test]
async fn test_list_parses_jlist() {
    let dir = TempDir::new().unwrap();
    let body = r#"echo '[{"name":"claude-mem-worker","pm2_env":{"status":"online"}},{"name":"other","pm2_env":{"status":"stopped"}}]'"#;
    let pm2 = Pm2Supervisor::with_program(fake_pm2(dir.path(), body));

    let records = pm2.list().await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].status, ProcessStatus::Online);
    assert!(spec(dir.path()).is_online_in(&records));
}

#[tokio::test]
async fn test_list_failure_is_reported() {
    let dir = TempDir::new().unwrap();
    let pm2 = Pm2Supervisor::with_program(fake_pm2(dir.path(), "echo 'daemon not running' >&2\nexit 2"));

    let err = pm2.list().await.unwrap_err();
    assert!(matches!(err, MemkeeperError::SupervisorOutput { .. }));
}

#[tokio::test]
async fn test_package_local_pm2_is_preferred() {
    let dir = TempDir::new().unwrap();
    let bin = dir.path().join("node_modules").join(".bin");
    fs::create_dir_all(&bin).unwrap();
    let local = fake_pm2(&bin, "echo '[]'");

    let pm2 = Pm2Supervisor::for_package(dir.path());

    assert_eq!(pm2.program(), local.as_path());
    assert!(pm2.list().await.unwrap().is_empty());
}
