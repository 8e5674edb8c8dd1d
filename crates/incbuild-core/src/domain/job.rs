//! Per-project job records.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::{IncbuildError, Result};
use crate::domain::project::ProjectId;
use crate::domain::stats::RtsStats;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Running,
    Passed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Passed | JobStatus::Failed)
    }
}

/// Why a job failed. Every failure belongs to exactly one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobFailure {
    /// The driver exited nonzero or could not be started.
    DriverFailure {
        exit_code: Option<i32>,
        reason: String,
    },
    /// RTS markers were present but inconsistent.
    MalformedTelemetry { reason: String },
    /// An artifact build or push failed.
    ArtifactTransport { reason: String },
    /// The job could not write its own artifacts.
    Storage { reason: String },
    /// The job task panicked or was lost.
    Aborted { reason: String },
}

impl JobFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            JobFailure::DriverFailure { .. } => "driver_failure",
            JobFailure::MalformedTelemetry { .. } => "malformed_telemetry",
            JobFailure::ArtifactTransport { .. } => "artifact_transport",
            JobFailure::Storage { .. } => "storage",
            JobFailure::Aborted { .. } => "aborted",
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            JobFailure::DriverFailure { reason, .. }
            | JobFailure::MalformedTelemetry { reason }
            | JobFailure::ArtifactTransport { reason }
            | JobFailure::Storage { reason }
            | JobFailure::Aborted { reason } => reason,
        }
    }
}

/// State of one project's job within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub project_id: ProjectId,
    pub status: JobStatus,
    /// Captured driver output.
    pub log_ref: Option<PathBuf>,
    /// SHA-256 of the captured output, hex encoded.
    #[serde(default)]
    pub log_sha256: Option<String>,
    /// Persisted copy of this record.
    pub result_ref: Option<PathBuf>,
    pub stats: Option<RtsStats>,
    pub failure: Option<JobFailure>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// A fresh record in `Pending`.
    pub fn new(project_id: ProjectId) -> Self {
        Self {
            project_id,
            status: JobStatus::Pending,
            log_ref: None,
            log_sha256: None,
            result_ref: None,
            stats: None,
            failure: None,
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(&mut self, to: JobStatus) -> Result<()> {
        let legal = matches!(
            (self.status, to),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Passed)
                | (JobStatus::Running, JobStatus::Failed)
        );
        if !legal {
            return Err(IncbuildError::IllegalTransition {
                project: self.project_id.to_string(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// `Pending -> Running`.
    pub fn start(&mut self) -> Result<()> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// `Running -> Passed`.
    pub fn pass(&mut self, stats: Option<RtsStats>) -> Result<()> {
        self.transition(JobStatus::Passed)?;
        self.stats = stats;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// `Running -> Failed`.
    pub fn fail(&mut self, failure: JobFailure) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.failure = Some(failure);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Record for a job whose task never reported back.
    pub fn aborted(project_id: ProjectId, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            status: JobStatus::Failed,
            failure: Some(JobFailure::Aborted {
                reason: reason.into(),
            }),
            started_at: Some(now),
            finished_at: Some(now),
            ..Self::new(project_id)
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> JobRecord {
        JobRecord::new(ProjectId::new("oss", "jvm", "alpha").unwrap())
    }

    #[test]
    fn test_happy_path() {
        let mut r = record();
        assert_eq!(r.status, JobStatus::Pending);
        r.start().unwrap();
        r.pass(Some(RtsStats::new(10, 4, 6).unwrap())).unwrap();
        assert_eq!(r.status, JobStatus::Passed);
        assert!(r.status.is_terminal());
        assert!(r.duration_ms().is_some());
    }

    #[test]
    fn test_cannot_finish_twice() {
        let mut r = record();
        r.start().unwrap();
        r.fail(JobFailure::DriverFailure {
            exit_code: Some(1),
            reason: "exit status 1".to_string(),
        })
        .unwrap();
        let err = r.pass(None).unwrap_err();
        assert!(matches!(
            err,
            IncbuildError::IllegalTransition {
                from: JobStatus::Failed,
                to: JobStatus::Passed,
                ..
            }
        ));
        assert_eq!(r.status, JobStatus::Failed);
    }

    #[test]
    fn test_cannot_skip_running() {
        let mut r = record();
        assert!(r.pass(None).is_err());
        assert!(r.start().is_ok());
        assert!(r.start().is_err());
    }

    #[test]
    fn test_failure_serializes_with_kind() {
        let failure = JobFailure::MalformedTelemetry {
            reason: "total 100 != selected 40 + excluded 70".to_string(),
        };
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "malformed_telemetry");
        assert_eq!(failure.kind(), "malformed_telemetry");
    }

    #[test]
    fn test_aborted_record_is_failed() {
        let r = JobRecord::aborted(ProjectId::new("a", "b", "c").unwrap(), "panicked");
        assert_eq!(r.status, JobStatus::Failed);
        assert_eq!(r.failure.unwrap().reason(), "panicked");
    }
}
