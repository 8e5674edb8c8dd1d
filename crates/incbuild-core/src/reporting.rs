//! Batch summary artifacts: `summary.json` and its markdown rendering.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::ConfigEcho;
use crate::domain::{JobRecord, JobStatus, RtsStats, RunSummary};

/// Batch summary file name under the artifact root.
pub const SUMMARY_JSON: &str = "summary.json";

/// Markdown rendering of the batch summary.
pub const SUMMARY_MD: &str = "summary.md";

const SCHEMA_VERSION: &str = "1.0";

/// One project's line in the persisted summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectResultArtifact {
    pub project_id: String,
    pub status: JobStatus,
    pub failure_kind: Option<String>,
    pub failure_reason: Option<String>,
    pub stats: Option<RtsStats>,
    pub duration_ms: Option<i64>,
}

impl From<&JobRecord> for ProjectResultArtifact {
    fn from(record: &JobRecord) -> Self {
        Self {
            project_id: record.project_id.to_string(),
            status: record.status,
            failure_kind: record.failure.as_ref().map(|f| f.kind().to_string()),
            failure_reason: record.failure.as_ref().map(|f| f.reason().to_string()),
            stats: record.stats,
            duration_ms: record.duration_ms(),
        }
    }
}

/// Canonical batch summary artifact written next to the per-project results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryArtifact {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub batch_id: String,
    pub config: ConfigEcho,
    pub summary: RunSummary,
    /// In input order.
    pub projects: Vec<ProjectResultArtifact>,
}

impl SummaryArtifact {
    pub fn new(
        batch_id: impl Into<String>,
        config: ConfigEcho,
        summary: RunSummary,
        records: &[JobRecord],
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            batch_id: batch_id.into(),
            config,
            summary,
            projects: records.iter().map(ProjectResultArtifact::from).collect(),
        }
    }

    /// Tests selected and excluded across every project that reported stats.
    pub fn selection_totals(&self) -> (u64, u64) {
        self.projects
            .iter()
            .filter_map(|p| p.stats)
            .fold((0, 0), |(sel, exc), s| (sel + s.selected(), exc + s.excluded()))
    }
}

/// Write summary.json in pretty JSON format.
pub fn write_summary_json(path: &Path, artifact: &SummaryArtifact) -> Result<()> {
    let content = serde_json::to_string_pretty(artifact).context("serialize batch summary")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Render markdown summary for CI output.
pub fn render_summary_md(artifact: &SummaryArtifact) -> String {
    let summary = &artifact.summary;
    let mut out = String::new();
    out.push_str("# Batch Summary\n\n");
    out.push_str(&format!(
        "- batch: `{}`\n- projects: {}\n- passed: {}\n- failed: {}\n\n",
        artifact.batch_id, summary.total_projects, summary.passed_count, summary.failed_count
    ));

    out.push_str("## Config\n");
    out.push_str(&format!(
        "- workers: {}\n- push mode: {}\n- force rebuild: {}\n- force push: {}\n\n",
        artifact.config.worker_count,
        artifact.config.push_mode,
        artifact.config.force_rebuild,
        artifact.config.force_push
    ));

    let (selected, excluded) = artifact.selection_totals();
    if selected + excluded > 0 {
        out.push_str("## Test Selection\n");
        out.push_str(&format!(
            "- selected: {}\n- excluded: {}\n\n",
            selected, excluded
        ));
    }

    if !summary.failed_project_ids.is_empty() {
        out.push_str("## Failed Projects\n");
        for p in artifact
            .projects
            .iter()
            .filter(|p| p.status == JobStatus::Failed)
        {
            out.push_str(&format!(
                "- `{}`: {} ({})\n",
                p.project_id,
                p.failure_kind.as_deref().unwrap_or("unknown"),
                p.failure_reason.as_deref().unwrap_or("")
            ));
        }
        out.push('\n');
    }

    out.push_str("## Projects\n");
    out.push_str("| project | status | total | selected | excluded | rate |\n");
    out.push_str("|---|---|---|---|---|---|\n");
    for p in &artifact.projects {
        let (total, sel, exc) = match p.stats {
            Some(s) => (
                s.total().to_string(),
                s.selected().to_string(),
                s.excluded().to_string(),
            ),
            None => ("-".to_string(), "-".to_string(), "-".to_string()),
        };
        let rate = p
            .stats
            .and_then(|s| s.selection_rate())
            .map(|r| format!("{:.1}%", r * 100.0))
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "| `{}` | {:?} | {} | {} | {} | {} |\n",
            p.project_id, p.status, total, sel, exc, rate
        ));
    }
    out
}

/// Write summary.md.
pub fn write_summary_md(path: &Path, artifact: &SummaryArtifact) -> Result<()> {
    let md = render_summary_md(artifact);
    std::fs::write(path, md).with_context(|| format!("write {:?}", path))?;
    Ok(())
}
