//! Result Aggregator.

use chrono::Utc;

use crate::domain::{IncbuildError, JobRecord, JobStatus, Result, RunSummary};

/// Fold terminal job records into a summary.
///
/// A pending or running record means the scheduler handed over too early,
/// and is an error rather than something to count.
pub fn aggregate(records: &[JobRecord]) -> Result<RunSummary> {
    if let Some(open) = records.iter().find(|r| !r.status.is_terminal()) {
        return Err(IncbuildError::NonTerminalJob {
            project: open.project_id.to_string(),
            status: open.status,
        });
    }

    let failed_project_ids: Vec<String> = records
        .iter()
        .filter(|r| r.status == JobStatus::Failed)
        .map(|r| r.project_id.to_string())
        .collect();

    Ok(RunSummary {
        total_projects: records.len(),
        passed_count: records.len() - failed_project_ids.len(),
        failed_count: failed_project_ids.len(),
        failed_project_ids,
        timestamp: Utc::now(),
    })
}
