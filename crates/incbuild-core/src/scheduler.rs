//! Job Scheduler.
//!
//! Runs every project of a batch through the per-job pipeline (cache gate,
//! driver, telemetry, result artifact) on a bounded worker pool and hands
//! back one terminal [`JobRecord`] per project, in input order.
//!
//! Jobs never share mutable state: each one owns its project's directory
//! under the artifact root and its own artifact refs. A job that fails,
//! panics or is lost is recorded against its own project; the rest of the
//! batch keeps draining.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use artifact_registry::{ArtifactBackend, ArtifactKind};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{warn, Instrument};
use uuid::Uuid;

use crate::aggregate::aggregate;
use crate::cache_gate::CacheGate;
use crate::config::{validate_projects, RunConfig};
use crate::domain::{
    IncbuildError, JobFailure, JobRecord, JobStatus, Project, Result, RtsStats, RunSummary,
};
use crate::driver::{DriverFlags, ProjectDriver};
use crate::normalize::normalize;
use crate::obs::{
    emit_batch_finished, emit_batch_started, emit_job_finished, emit_job_started,
    emit_storage_error, emit_telemetry_rejected, project_span,
};
use crate::store::ResultStore;

/// Everything a finished batch produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub batch_id: String,
    /// One terminal record per project, in input order.
    pub records: Vec<JobRecord>,
    pub summary: RunSummary,
}

/// Shared, read-only state handed to every job.
struct JobContext {
    gate: CacheGate,
    driver: Arc<dyn ProjectDriver>,
    store: ResultStore,
    config: Arc<RunConfig>,
}

/// Bounded-parallel batch runner.
pub struct Scheduler {
    ctx: Arc<JobContext>,
}

impl Scheduler {
    pub fn new(
        config: Arc<RunConfig>,
        backend: Arc<dyn ArtifactBackend>,
        driver: Arc<dyn ProjectDriver>,
    ) -> Self {
        let ctx = JobContext {
            gate: CacheGate::new(backend, Arc::clone(&config)),
            driver,
            store: ResultStore::new(config.artifact_root.clone()),
            config,
        };
        Self { ctx: Arc::new(ctx) }
    }

    pub fn store(&self) -> &ResultStore {
        &self.ctx.store
    }

    /// Run the batch to completion.
    ///
    /// Configuration errors are returned before any job starts. After that,
    /// every project ends up with exactly one terminal record.
    pub async fn run(&self, projects: &[Project]) -> Result<BatchOutcome> {
        validate_projects(projects)?;

        let batch_id = Uuid::new_v4().to_string();
        let workers = self.ctx.config.worker_count.get();
        let started = Instant::now();
        emit_batch_started(&batch_id, projects.len(), workers);

        let permits = Arc::new(Semaphore::new(workers));
        let mut join_set = JoinSet::new();

        // Permits are taken here, in input order, so a pool of one runs the
        // batch strictly sequentially.
        for (idx, project) in projects.iter().cloned().enumerate() {
            let permit = Arc::clone(&permits)
                .acquire_owned()
                .await
                .map_err(|e| IncbuildError::Scheduler(format!("worker pool closed: {e}")))?;
            let ctx = Arc::clone(&self.ctx);
            join_set.spawn(async move {
                let id = project.id.clone();
                let job = AssertUnwindSafe(run_job(ctx, project)).catch_unwind();
                let record = match job.await {
                    Ok(record) => record,
                    Err(panic) => {
                        let reason = panic_message(panic.as_ref());
                        warn!(project = %id, reason = %reason, "job panicked");
                        let record = JobRecord::aborted(id, format!("job panicked: {reason}"));
                        emit_job_finished(
                            &record.project_id.to_string(),
                            false,
                            Some("aborted"),
                        );
                        record
                    }
                };
                drop(permit);
                (idx, record)
            });
        }

        let mut ordered: Vec<Option<JobRecord>> = vec![None; projects.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, record)) => ordered[idx] = Some(record),
                Err(e) => warn!(error = %e, "job task lost"),
            }
        }

        let records: Vec<JobRecord> = projects
            .iter()
            .zip(ordered)
            .map(|(project, slot)| {
                slot.unwrap_or_else(|| {
                    JobRecord::aborted(project.id.clone(), "job task did not report back")
                })
            })
            .collect();

        let summary = aggregate(&records)?;
        emit_batch_finished(
            &batch_id,
            summary.passed_count,
            summary.failed_count,
            started.elapsed().as_millis() as u64,
        );

        Ok(BatchOutcome {
            batch_id,
            records,
            summary,
        })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

async fn run_job(ctx: Arc<JobContext>, project: Project) -> JobRecord {
    let id = project.id.to_string();
    let span = project_span(&id);
    async move {
        emit_job_started(&id);
        let mut record = JobRecord::new(project.id.clone());
        if let Err(e) = record.start() {
            return JobRecord::aborted(project.id.clone(), e.to_string());
        }

        let outcome = ctx.execute(&project, &mut record).await;
        let finished = match outcome {
            Ok(stats) => record.pass(stats),
            Err(failure) => record.fail(failure),
        };
        if let Err(e) = finished {
            return JobRecord::aborted(project.id.clone(), e.to_string());
        }

        record.result_ref = Some(ctx.store.result_path(&project.id));
        if let Err(e) = ctx.store.write_result(&record) {
            emit_storage_error(&id, &e);
            record.result_ref = None;
        }

        emit_job_finished(
            &id,
            record.status == JobStatus::Passed,
            record.failure.as_ref().map(|f| f.kind()),
        );
        record
    }
    .instrument(span)
    .await
}

impl JobContext {
    /// The job body. `Ok` carries the stats to attach on success.
    async fn execute(
        &self,
        project: &Project,
        record: &mut JobRecord,
    ) -> std::result::Result<Option<RtsStats>, JobFailure> {
        let id = project.id.to_string();

        self.store
            .prepare(&project.id)
            .map_err(|e| JobFailure::Storage {
                reason: e.to_string(),
            })?;

        let mut kinds = vec![ArtifactKind::Base];
        if project.config.incremental_build_enabled {
            kinds.push(ArtifactKind::IncrementalSnapshot);
        }
        for kind in kinds {
            self.gate
                .ensure(project, kind)
                .await
                .map_err(|e| JobFailure::ArtifactTransport {
                    reason: e.to_string(),
                })?;
        }

        let flags = DriverFlags::for_project(project, self.store.project_dir(&project.id));
        let output = match self.driver.run(project, &flags).await {
            Ok(output) => output,
            Err(e) => {
                if let IncbuildError::DriverFailure { log, .. } = &e {
                    if !log.is_empty() {
                        self.record_log(project, record, log)?;
                    }
                }
                return Err(JobFailure::DriverFailure {
                    exit_code: None,
                    reason: e.to_string(),
                });
            }
        };
        self.record_log(project, record, &output.log)?;

        if !output.success() {
            return Err(JobFailure::DriverFailure {
                exit_code: Some(output.exit_code),
                reason: format!("driver exited with status {}", output.exit_code),
            });
        }

        let telemetry = normalize(&output.log_text()).map_err(|e| {
            emit_telemetry_rejected(&id, &e);
            JobFailure::MalformedTelemetry {
                reason: e.to_string(),
            }
        })?;

        Ok(project
            .config
            .rts_mode
            .is_active()
            .then_some(telemetry.stats))
    }

    fn record_log(
        &self,
        project: &Project,
        record: &mut JobRecord,
        log: &[u8],
    ) -> std::result::Result<(), JobFailure> {
        let (log_ref, digest) =
            self.store
                .write_log(&project.id, log)
                .map_err(|e| JobFailure::Storage {
                    reason: e.to_string(),
                })?;
        record.log_ref = Some(log_ref);
        record.log_sha256 = Some(digest);
        Ok(())
    }
}
