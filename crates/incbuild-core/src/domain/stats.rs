//! Normalized test-selection statistics.

use serde::{Deserialize, Serialize};

use crate::domain::error::{IncbuildError, Result};

/// Test counts for one job. Always satisfies `total = selected + excluded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawStats")]
pub struct RtsStats {
    total: u64,
    selected: u64,
    excluded: u64,
}

#[derive(Deserialize)]
struct RawStats {
    total: u64,
    selected: u64,
    excluded: u64,
}

impl TryFrom<RawStats> for RtsStats {
    type Error = IncbuildError;

    fn try_from(raw: RawStats) -> Result<Self> {
        RtsStats::new(raw.total, raw.selected, raw.excluded)
    }
}

impl RtsStats {
    /// Build from a reported triple, rejecting inconsistent counts.
    pub fn new(total: u64, selected: u64, excluded: u64) -> Result<Self> {
        match selected.checked_add(excluded) {
            Some(sum) if sum == total => Ok(Self {
                total,
                selected,
                excluded,
            }),
            _ => Err(IncbuildError::MalformedTelemetry(format!(
                "total {} != selected {} + excluded {}",
                total, selected, excluded
            ))),
        }
    }

    /// Stats for a run without selection: everything ran.
    pub fn all_selected(tests_run: u64) -> Self {
        Self {
            total: tests_run,
            selected: tests_run,
            excluded: 0,
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn selected(&self) -> u64 {
        self.selected
    }

    pub fn excluded(&self) -> u64 {
        self.excluded
    }

    /// Fraction of tests that were selected, `None` when there were none.
    pub fn selection_rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.selected as f64 / self.total as f64)
    }
}
