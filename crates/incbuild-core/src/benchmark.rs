//! RTS benchmark comparison.
//!
//! Compares one build without test selection against one with it: wall
//! time, tests run, classes executed, analysis overhead and whether the
//! selective run changed the failure picture.

use serde::{Deserialize, Serialize};

use crate::log_analysis::LogAnalysis;

/// Side-by-side figures for a baseline run and an RTS run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub without_rts_secs: f64,
    pub with_rts_secs: f64,
    /// Negative when the RTS run was slower.
    pub time_saved_secs: f64,
    /// `None` when the RTS run took no measurable time.
    pub speedup: Option<f64>,
    pub reduction_pct: Option<f64>,
    pub tests_run_without: u64,
    pub tests_run_with: u64,
    pub tests_skipped: u64,
    /// Share of the baseline's tests the RTS run executed.
    pub selection_rate: Option<f64>,
    pub classes_run_without: usize,
    pub classes_run_with: usize,
    /// Time the RTS tool spent on analysis.
    pub analysis_secs: f64,
    /// Analysis time as a share of the RTS run's wall time.
    pub analysis_overhead_pct: Option<f64>,
    pub failures_delta: i64,
    pub errors_delta: i64,
    pub skipped_delta: i64,
}

impl BenchmarkReport {
    /// The RTS run failed or errored where the baseline did not.
    pub fn has_regression(&self) -> bool {
        self.failures_delta > 0 || self.errors_delta > 0
    }
}

fn ratio(num: f64, den: f64) -> Option<f64> {
    (den > 0.0).then(|| num / den)
}

fn delta(with: u64, without: u64) -> i64 {
    with as i64 - without as i64
}

/// Compare a baseline log against an RTS log.
///
/// `without_secs` and `with_secs` are measured wall times; when either is
/// zero the `Total time:` reported in the corresponding log is used.
pub fn compare(
    without: &LogAnalysis,
    with: &LogAnalysis,
    without_secs: f64,
    with_secs: f64,
) -> BenchmarkReport {
    let without_secs = if without_secs > 0.0 {
        without_secs
    } else {
        without.total_time_secs
    };
    let with_secs = if with_secs > 0.0 {
        with_secs
    } else {
        with.total_time_secs
    };
    let time_saved_secs = without_secs - with_secs;

    BenchmarkReport {
        without_rts_secs: without_secs,
        with_rts_secs: with_secs,
        time_saved_secs,
        speedup: ratio(without_secs, with_secs),
        reduction_pct: ratio(time_saved_secs * 100.0, without_secs),
        tests_run_without: without.tests_run,
        tests_run_with: with.tests_run,
        tests_skipped: without.tests_run.saturating_sub(with.tests_run),
        selection_rate: ratio(with.tests_run as f64, without.tests_run as f64),
        classes_run_without: without.run_classes.len(),
        classes_run_with: with.run_classes.len(),
        analysis_secs: with.rts_time_secs,
        analysis_overhead_pct: ratio(with.rts_time_secs * 100.0, with_secs),
        failures_delta: delta(with.failures, without.failures),
        errors_delta: delta(with.errors, without.errors),
        skipped_delta: delta(with.skipped, without.skipped),
    }
}

fn opt(value: Option<f64>, suffix: &str) -> String {
    match value {
        Some(v) => format!("{:.2}{}", v, suffix),
        None => "n/a".to_string(),
    }
}

/// Render a markdown comparison table.
pub fn render_benchmark_md(report: &BenchmarkReport) -> String {
    let mut out = String::new();
    out.push_str("# RTS Benchmark\n\n");
    out.push_str("| metric | without RTS | with RTS |\n");
    out.push_str("|---|---|---|\n");
    out.push_str(&format!(
        "| time (s) | {:.2} | {:.2} |\n",
        report.without_rts_secs, report.with_rts_secs
    ));
    out.push_str(&format!(
        "| tests run | {} | {} |\n",
        report.tests_run_without, report.tests_run_with
    ));
    out.push_str(&format!(
        "| test classes | {} | {} |\n\n",
        report.classes_run_without, report.classes_run_with
    ));

    out.push_str("## Savings\n");
    out.push_str(&format!(
        "- time saved: {:.2}s\n- speedup: {}\n- reduction: {}\n- tests skipped: {}\n- selection rate: {}\n\n",
        report.time_saved_secs,
        opt(report.speedup, "x"),
        opt(report.reduction_pct, "%"),
        report.tests_skipped,
        opt(report.selection_rate.map(|r| r * 100.0), "%"),
    ));

    out.push_str("## Analysis Overhead\n");
    out.push_str(&format!(
        "- analysis time: {:.2}s\n- share of RTS run: {}\n\n",
        report.analysis_secs,
        opt(report.analysis_overhead_pct, "%")
    ));

    out.push_str("## Outcome Deltas\n");
    out.push_str(&format!(
        "- failures: {:+}\n- errors: {:+}\n- skipped: {:+}\n",
        report.failures_delta, report.errors_delta, report.skipped_delta
    ));
    if report.has_regression() {
        out.push_str("\n**RTS run reported failures the baseline did not.**\n");
    }
    out
}
