//! Runs real shell scripts through the process driver.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use incbuild_core::{
    DriverFlags, IncbuildError, Project, ProjectDriver, ProjectId, RtsMode,
};
use incbuild_driver::ProcessDriver;
use tempfile::TempDir;

fn script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("driver.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn project(dir: &TempDir) -> Project {
    let path = dir.path().join("alpha");
    std::fs::create_dir_all(&path).unwrap();
    Project::new(ProjectId::new("oss", "jvm", "alpha").unwrap(), path)
}

#[tokio::test]
async fn test_interleaves_stdout_and_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let driver = ProcessDriver::new(script(
        dir.path(),
        "echo one\nsleep 0.2\necho two >&2\nsleep 0.2\necho three\nexit 0",
    ));
    let p = project(&dir);
    let flags = DriverFlags::for_project(&p, dir.path().join("results"));

    let output = driver.run(&p, &flags).await.unwrap();
    assert!(output.success());
    assert_eq!(output.log_text(), "one\ntwo\nthree\n");
}

#[tokio::test]
async fn test_passes_args_env_and_cwd() {
    let dir = tempfile::tempdir().unwrap();
    let driver = ProcessDriver::new(script(
        dir.path(),
        "echo \"args=$*\"\necho \"rts=$RTS_ON/$RTS_TOOL\"\necho \"cwd=$(basename \"$PWD\")\"",
    ));
    let p = project(&dir).with_rts(RtsMode::Ekstazi).with_incremental(true);
    let flags = DriverFlags::for_project(&p, "/out");

    let output = driver.run(&p, &flags).await.unwrap();
    let log = output.log_text();
    assert!(log.contains("args=oss/jvm/alpha /out --rts ekstazi --incremental"));
    assert!(log.contains("rts=1/ekstazi"));
    assert!(log.contains("cwd=alpha"));
}

#[tokio::test]
async fn test_nonzero_exit_is_output_not_error() {
    let dir = tempfile::tempdir().unwrap();
    let driver = ProcessDriver::new(script(dir.path(), "echo '[ERROR] BUILD FAILURE'\nexit 3"));
    let p = project(&dir);
    let flags = DriverFlags::for_project(&p, "/out");

    let output = driver.run(&p, &flags).await.unwrap();
    assert_eq!(output.exit_code, 3);
    assert!(output.log_text().contains("BUILD FAILURE"));
}

#[tokio::test]
async fn test_missing_program_is_driver_failure() {
    let dir = tempfile::tempdir().unwrap();
    let driver = ProcessDriver::new(dir.path().join("no-such-driver"));
    let p = project(&dir);
    let flags = DriverFlags::for_project(&p, "/out");

    let err = driver.run(&p, &flags).await.unwrap_err();
    match err {
        IncbuildError::DriverFailure { log, .. } => assert!(log.is_empty()),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_timeout_keeps_partial_output() {
    let dir = tempfile::tempdir().unwrap();
    let driver = ProcessDriver::new(script(
        dir.path(),
        "echo '[INFO] compiling'\necho 'slow warning' >&2\nsleep 5",
    ))
    .with_timeout_secs(1);
    let p = project(&dir);
    let flags = DriverFlags::for_project(&p, "/out");

    let err = driver.run(&p, &flags).await.unwrap_err();
    assert!(err.to_string().contains("timed out after 1 seconds"));
    match err {
        IncbuildError::DriverFailure { log, .. } => {
            let text = String::from_utf8_lossy(&log);
            assert!(text.contains("[INFO] compiling"));
            assert!(text.contains("slow warning"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
