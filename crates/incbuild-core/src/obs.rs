//! Structured observability hooks for batch and job lifecycle events.
//!
//! - Project-scoped tracing spans via [`project_span`]
//! - Emission functions for batch start/finish, job start/finish, cache
//!   decisions, and rejected telemetry
//!
//! Events are emitted at `info!` level; filter with `RUST_LOG`.

use artifact_registry::ArtifactKind;
use tracing::{info, warn};

use crate::cache_gate::{BuildDecision, PushDecision};

/// Span for a job future. Use with `tracing::Instrument` across awaits.
pub fn project_span(project_id: &str) -> tracing::Span {
    tracing::info_span!("incbuild.job", project = %project_id)
}

pub fn emit_batch_started(batch_id: &str, total_projects: usize, worker_count: usize) {
    info!(
        event = "batch.started",
        batch_id = %batch_id,
        total_projects = total_projects,
        worker_count = worker_count,
    );
}

pub fn emit_batch_finished(batch_id: &str, passed: usize, failed: usize, duration_ms: u64) {
    info!(
        event = "batch.finished",
        batch_id = %batch_id,
        passed = passed,
        failed = failed,
        duration_ms = duration_ms,
    );
}

pub fn emit_job_started(project_id: &str) {
    info!(event = "job.started", project = %project_id);
}

/// Emit event: job reached a terminal state.
pub fn emit_job_finished(project_id: &str, passed: bool, failure_kind: Option<&str>) {
    info!(
        event = "job.finished",
        project = %project_id,
        passed = passed,
        failure = failure_kind.unwrap_or("none"),
    );
}

pub fn emit_cache_decision(
    project_id: &str,
    kind: ArtifactKind,
    build: BuildDecision,
    push: Option<PushDecision>,
) {
    info!(
        event = "cache.decision",
        project = %project_id,
        artifact = %kind,
        build = ?build,
        push = ?push,
    );
}

/// Emit event: RTS markers were present but inconsistent (warning level).
pub fn emit_telemetry_rejected(project_id: &str, reason: &dyn std::fmt::Display) {
    warn!(event = "telemetry.rejected", project = %project_id, reason = %reason);
}

/// Emit event: a job artifact could not be written (warning level).
pub fn emit_storage_error(project_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "job.storage_error", project = %project_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_span_carries_project() {
        let span = project_span("oss/jvm/alpha");
        let _entered = span.enter();
        emit_job_started("oss/jvm/alpha");
        emit_job_finished("oss/jvm/alpha", false, Some("driver_failure"));
    }
}
