//! Batch summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a whole batch. Built once every job is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_projects: usize,
    pub passed_count: usize,
    pub failed_count: usize,
    /// Failed projects in input order.
    pub failed_project_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl RunSummary {
    pub fn all_passed(&self) -> bool {
        self.failed_count == 0
    }

    /// Process exit code for the batch: `0` iff nothing failed.
    pub fn exit_code(&self) -> i32 {
        if self.all_passed() {
            0
        } else {
            1
        }
    }

    /// Equal in everything but the timestamp.
    pub fn same_outcome(&self, other: &RunSummary) -> bool {
        self.total_projects == other.total_projects
            && self.passed_count == other.passed_count
            && self.failed_count == other.failed_count
            && self.failed_project_ids == other.failed_project_ids
    }
}
