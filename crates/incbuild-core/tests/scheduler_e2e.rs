//! End-to-end batch runs against a scripted driver and an in-memory
//! artifact backend.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use artifact_registry::{ArtifactKind, ArtifactLocation, ArtifactRef, MemoryBackend};
use async_trait::async_trait;
use incbuild_core::{
    DriverFlags, DriverOutput, IncbuildError, JobFailure, JobStatus, Project, ProjectDriver,
    ProjectId, PushMode, Result, RtsMode, RtsStats, RunConfig, Scheduler,
};
use tempfile::TempDir;

#[derive(Clone)]
enum Script {
    Exit(i32, &'static str),
    Unavailable,
    /// Fails after producing some output.
    TimedOut(&'static str),
    Panic,
}

/// Driver that replays a canned result per project and records calls.
#[derive(Default)]
struct ScriptedDriver {
    scripts: HashMap<String, Script>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
}

impl ScriptedDriver {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn script(mut self, project: &str, script: Script) -> Self {
        self.scripts.insert(project.to_string(), script);
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

const PASSING_LOG: &str = "[INFO] Results:\n[INFO]\n[INFO] Tests run: 12, Failures: 0, Errors: 0, Skipped: 0\n";

#[async_trait]
impl ProjectDriver for ScriptedDriver {
    async fn run(&self, project: &Project, _flags: &DriverFlags) -> Result<DriverOutput> {
        let id = project.id.to_string();
        self.calls.lock().unwrap().push(id.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.scripts.get(&id).cloned() {
            None => Ok(DriverOutput::new(0, PASSING_LOG)),
            Some(Script::Exit(code, log)) => Ok(DriverOutput::new(code, log)),
            Some(Script::Unavailable) => Err(IncbuildError::DriverFailure {
                project: id,
                reason: "driver binary not found".to_string(),
                log: Vec::new(),
            }),
            Some(Script::TimedOut(partial)) => Err(IncbuildError::DriverFailure {
                project: id,
                reason: "timed out after 1 seconds".to_string(),
                log: partial.as_bytes().to_vec(),
            }),
            Some(Script::Panic) => panic!("driver blew up for {id}"),
        }
    }
}

struct Fixture {
    sources: TempDir,
    results: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            sources: tempfile::tempdir().unwrap(),
            results: tempfile::tempdir().unwrap(),
        }
    }

    fn project(&self, name: &str) -> Project {
        let dir = self.sources.path().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        Project::new(ProjectId::new("oss", "jvm", name).unwrap(), dir)
    }

    fn projects(&self, n: usize) -> Vec<Project> {
        (0..n).map(|i| self.project(&format!("p{i:02}"))).collect()
    }

    fn config(&self, workers: usize) -> RunConfig {
        RunConfig::new(self.results.path())
            .with_workers(workers)
            .unwrap()
    }

    fn root(&self) -> &Path {
        self.results.path()
    }
}

fn scheduler(
    config: RunConfig,
    backend: &Arc<MemoryBackend>,
    driver: &Arc<ScriptedDriver>,
) -> Scheduler {
    Scheduler::new(Arc::new(config), backend.clone(), driver.clone())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ten_projects_four_workers_all_pass() {
    let fx = Fixture::new();
    let projects = fx.projects(10);
    let backend = Arc::new(MemoryBackend::new());
    let driver = Arc::new(ScriptedDriver::with_delay(Duration::from_millis(20)));

    let outcome = scheduler(fx.config(4), &backend, &driver)
        .run(&projects)
        .await
        .unwrap();

    assert_eq!(outcome.summary.total_projects, 10);
    assert_eq!(outcome.summary.passed_count, 10);
    assert_eq!(outcome.summary.failed_count, 0);
    assert_eq!(outcome.summary.exit_code(), 0);
    assert!(driver.max_in_flight() <= 4);
    assert_eq!(driver.calls().len(), 10);

    for (project, record) in projects.iter().zip(&outcome.records) {
        assert_eq!(record.project_id, project.id);
        assert_eq!(record.status, JobStatus::Passed);
        // No RTS mode, no stats.
        assert_eq!(record.stats, None);
        let log_ref = record.log_ref.as_ref().unwrap();
        assert!(log_ref.starts_with(fx.root().join("oss/jvm").join(project.id.name())));
        assert_eq!(std::fs::read_to_string(log_ref).unwrap(), PASSING_LOG);
        assert!(record.result_ref.as_ref().unwrap().is_file());
    }
}

#[tokio::test]
async fn test_inconsistent_markers_fail_only_that_project() {
    let fx = Fixture::new();
    let projects = vec![
        fx.project("alpha").with_rts(RtsMode::Ekstazi),
        fx.project("beta").with_rts(RtsMode::Ekstazi),
    ];
    let driver = Arc::new(
        ScriptedDriver::default()
            .script(
                "oss/jvm/alpha",
                Script::Exit(0, "[RTS] Total: 100\n[RTS] Selected: 40\n[RTS] Excluded: 60\n"),
            )
            .script(
                "oss/jvm/beta",
                Script::Exit(0, "[RTS] Total: 100\n[RTS] Selected: 40\n[RTS] Excluded: 70\n"),
            ),
    );
    let backend = Arc::new(MemoryBackend::new());

    let outcome = scheduler(fx.config(2), &backend, &driver)
        .run(&projects)
        .await
        .unwrap();

    let alpha = &outcome.records[0];
    assert_eq!(alpha.status, JobStatus::Passed);
    assert_eq!(alpha.stats, Some(RtsStats::new(100, 40, 60).unwrap()));

    let beta = &outcome.records[1];
    assert_eq!(beta.status, JobStatus::Failed);
    assert!(matches!(
        beta.failure,
        Some(JobFailure::MalformedTelemetry { .. })
    ));
    assert_eq!(beta.stats, None);
    // The offending log is still kept for inspection.
    assert!(beta.log_ref.as_ref().unwrap().is_file());

    assert_eq!(outcome.summary.failed_project_ids, vec!["oss/jvm/beta"]);
    assert_eq!(outcome.summary.exit_code(), 1);
}

#[tokio::test]
async fn test_no_fail_fast_and_failed_ids_in_input_order() {
    let fx = Fixture::new();
    let projects = vec![
        fx.project("a"),
        fx.project("b"),
        fx.project("c"),
        fx.project("d"),
        fx.project("e"),
    ];
    let driver = Arc::new(
        ScriptedDriver::default()
            .script("oss/jvm/d", Script::Exit(1, "BUILD FAILURE\n"))
            .script("oss/jvm/b", Script::Unavailable),
    );
    let backend = Arc::new(MemoryBackend::new());

    let outcome = scheduler(fx.config(3), &backend, &driver)
        .run(&projects)
        .await
        .unwrap();

    assert_eq!(driver.calls().len(), 5);
    assert_eq!(outcome.summary.failed_project_ids, vec!["oss/jvm/b", "oss/jvm/d"]);
    assert_eq!(outcome.summary.passed_count, 3);

    match &outcome.records[3].failure {
        Some(JobFailure::DriverFailure { exit_code, .. }) => assert_eq!(*exit_code, Some(1)),
        other => panic!("unexpected failure: {other:?}"),
    }
    match &outcome.records[1].failure {
        Some(JobFailure::DriverFailure { exit_code, reason }) => {
            assert_eq!(*exit_code, None);
            assert!(reason.contains("driver binary not found"));
        }
        other => panic!("unexpected failure: {other:?}"),
    }
    // A driver that never ran leaves no log behind.
    assert_eq!(outcome.records[1].log_ref, None);
}

#[tokio::test]
async fn test_timed_out_driver_keeps_partial_log() {
    let fx = Fixture::new();
    let projects = vec![fx.project("alpha"), fx.project("beta")];
    let driver = Arc::new(
        ScriptedDriver::default().script("oss/jvm/alpha", Script::TimedOut("[INFO] compiling\n")),
    );
    let backend = Arc::new(MemoryBackend::new());

    let outcome = scheduler(fx.config(2), &backend, &driver)
        .run(&projects)
        .await
        .unwrap();

    let alpha = &outcome.records[0];
    match &alpha.failure {
        Some(JobFailure::DriverFailure { exit_code, reason }) => {
            assert_eq!(*exit_code, None);
            assert!(reason.contains("timed out"));
        }
        other => panic!("unexpected failure: {other:?}"),
    }
    let log_ref = alpha.log_ref.as_ref().unwrap();
    assert_eq!(std::fs::read_to_string(log_ref).unwrap(), "[INFO] compiling\n");
    assert_eq!(alpha.log_sha256.as_ref().map(String::len), Some(64));
    assert_eq!(outcome.records[1].status, JobStatus::Passed);
}

#[tokio::test]
async fn test_one_and_many_workers_agree() {
    let fx = Fixture::new();
    let projects = fx.projects(8);
    let script = || {
        ScriptedDriver::default()
            .script("oss/jvm/p02", Script::Exit(3, "boom\n"))
            .script("oss/jvm/p05", Script::Exit(0, "[RTS] Total: 4\n[RTS] Selected: 4\n"))
            .script("oss/jvm/p07", Script::Unavailable)
    };

    let seq = scheduler(
        fx.config(1),
        &Arc::new(MemoryBackend::new()),
        &Arc::new(script()),
    )
    .run(&projects)
    .await
    .unwrap();
    let par = scheduler(
        fx.config(4),
        &Arc::new(MemoryBackend::new()),
        &Arc::new(script()),
    )
    .run(&projects)
    .await
    .unwrap();

    assert!(seq.summary.same_outcome(&par.summary));
    assert_eq!(
        seq.summary.failed_project_ids,
        vec!["oss/jvm/p02", "oss/jvm/p05", "oss/jvm/p07"]
    );
    let statuses = |o: &incbuild_core::BatchOutcome| {
        o.records.iter().map(|r| r.status).collect::<Vec<_>>()
    };
    assert_eq!(statuses(&seq), statuses(&par));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_worker_runs_in_input_order() {
    let fx = Fixture::new();
    let projects = fx.projects(6);
    let driver = Arc::new(ScriptedDriver::with_delay(Duration::from_millis(5)));

    scheduler(fx.config(1), &Arc::new(MemoryBackend::new()), &driver)
        .run(&projects)
        .await
        .unwrap();

    let expected: Vec<String> = projects.iter().map(|p| p.id.to_string()).collect();
    assert_eq!(driver.calls(), expected);
    assert_eq!(driver.max_in_flight(), 1);
}

#[tokio::test]
async fn test_duplicate_ids_rejected_before_any_job() {
    let fx = Fixture::new();
    let alpha = fx.project("alpha");
    let projects = vec![alpha.clone(), fx.project("beta"), alpha];
    let driver = Arc::new(ScriptedDriver::default());
    let backend = Arc::new(MemoryBackend::new());

    let err = scheduler(fx.config(2), &backend, &driver)
        .run(&projects)
        .await
        .unwrap_err();

    assert!(matches!(err, IncbuildError::Config(_)));
    assert!(driver.calls().is_empty());
    assert!(backend.builds().is_empty());
}

#[tokio::test]
async fn test_missing_project_dir_rejected() {
    let fx = Fixture::new();
    let ghost = Project::new(
        ProjectId::new("oss", "jvm", "ghost").unwrap(),
        fx.sources.path().join("ghost"),
    );
    let driver = Arc::new(ScriptedDriver::default());
    let err = scheduler(fx.config(1), &Arc::new(MemoryBackend::new()), &driver)
        .run(&[ghost])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("does not exist"));
}

#[tokio::test]
async fn test_panicking_driver_fails_only_its_project() {
    let fx = Fixture::new();
    let projects = fx.projects(4);
    let driver = Arc::new(ScriptedDriver::default().script("oss/jvm/p01", Script::Panic));

    let outcome = scheduler(fx.config(2), &Arc::new(MemoryBackend::new()), &driver)
        .run(&projects)
        .await
        .unwrap();

    assert_eq!(outcome.records.len(), 4);
    assert_eq!(outcome.summary.failed_project_ids, vec!["oss/jvm/p01"]);
    match &outcome.records[1].failure {
        Some(JobFailure::Aborted { reason }) => assert!(reason.contains("driver blew up")),
        other => panic!("unexpected failure: {other:?}"),
    }
    assert!(outcome
        .records
        .iter()
        .all(|r| r.status.is_terminal()));
}

#[tokio::test]
async fn test_artifact_failure_skips_driver() {
    let fx = Fixture::new();
    let projects = vec![fx.project("alpha"), fx.project("beta")];
    let backend = Arc::new(MemoryBackend::new());
    backend.fail_builds_of(ArtifactRef::new("oss/jvm/alpha", ArtifactKind::Base));
    let driver = Arc::new(ScriptedDriver::default());

    let outcome = scheduler(fx.config(2), &backend, &driver)
        .run(&projects)
        .await
        .unwrap();

    assert!(matches!(
        outcome.records[0].failure,
        Some(JobFailure::ArtifactTransport { .. })
    ));
    assert_eq!(outcome.records[1].status, JobStatus::Passed);
    assert_eq!(driver.calls(), vec!["oss/jvm/beta"]);
}

#[tokio::test]
async fn test_push_failure_fails_only_that_project() {
    let fx = Fixture::new();
    let projects = vec![fx.project("alpha"), fx.project("beta"), fx.project("gamma")];
    let backend = Arc::new(MemoryBackend::new());
    let beta_base = ArtifactRef::new("oss/jvm/beta", ArtifactKind::Base);
    backend.fail_pushes_of(beta_base.clone());
    let driver = Arc::new(ScriptedDriver::default());
    let config = fx.config(2).with_push_mode(PushMode::Base);

    let outcome = scheduler(config, &backend, &driver)
        .run(&projects)
        .await
        .unwrap();

    match &outcome.records[1].failure {
        Some(JobFailure::ArtifactTransport { reason }) => {
            assert!(reason.contains("injected push failure"))
        }
        other => panic!("unexpected failure: {other:?}"),
    }
    assert_eq!(outcome.summary.failed_project_ids, vec!["oss/jvm/beta"]);
    assert_eq!(outcome.summary.passed_count, 2);
    // built locally, never published
    assert_eq!(backend.location(&beta_base), ArtifactLocation::LocalOnly);
    assert_eq!(
        backend.location(&ArtifactRef::new("oss/jvm/gamma", ArtifactKind::Base)),
        ArtifactLocation::Both
    );
    assert_eq!(driver.calls().len(), 2);
    assert!(!driver.calls().contains(&"oss/jvm/beta".to_string()));
}

#[tokio::test]
async fn test_incremental_projects_gate_both_artifacts() {
    let fx = Fixture::new();
    let projects = vec![
        fx.project("alpha").with_incremental(true),
        fx.project("beta"),
    ];
    let backend = Arc::new(MemoryBackend::new());
    let driver = Arc::new(ScriptedDriver::default());
    let config = fx.config(1).with_push_mode(PushMode::Both);

    scheduler(config, &backend, &driver)
        .run(&projects)
        .await
        .unwrap();

    let alpha_inc = ArtifactRef::new("oss/jvm/alpha", ArtifactKind::IncrementalSnapshot);
    let beta_inc = ArtifactRef::new("oss/jvm/beta", ArtifactKind::IncrementalSnapshot);
    assert_eq!(backend.location(&alpha_inc), ArtifactLocation::Both);
    assert_eq!(backend.location(&beta_inc), ArtifactLocation::Absent);
    assert_eq!(backend.builds().len(), 3);
    assert_eq!(backend.pushes().len(), 3);
}

#[tokio::test]
async fn test_rerun_skips_cached_artifacts() {
    let fx = Fixture::new();
    let projects = fx.projects(3);
    let backend = Arc::new(MemoryBackend::new());
    let driver = Arc::new(ScriptedDriver::default());

    let first = scheduler(fx.config(2), &backend, &driver)
        .run(&projects)
        .await
        .unwrap();
    let second = scheduler(fx.config(2), &backend, &driver)
        .run(&projects)
        .await
        .unwrap();

    assert!(first.summary.same_outcome(&second.summary));
    assert_ne!(first.batch_id, second.batch_id);
    assert_eq!(backend.builds().len(), 3);
}

#[tokio::test]
async fn test_result_artifact_round_trips() {
    let fx = Fixture::new();
    let project = fx.project("alpha").with_rts(RtsMode::Jcgeks);
    let driver = Arc::new(ScriptedDriver::default());
    let sched = scheduler(fx.config(1), &Arc::new(MemoryBackend::new()), &driver);

    let outcome = sched.run(std::slice::from_ref(&project)).await.unwrap();
    let stored = sched.store().read_result(&project.id).unwrap();

    assert_eq!(stored, outcome.records[0]);
    // Native fallback: everything that ran was selected.
    assert_eq!(stored.stats, Some(RtsStats::all_selected(12)));
    assert_eq!(stored.log_sha256.as_ref().map(String::len), Some(64));
}
