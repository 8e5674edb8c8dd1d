//! Maven/surefire log analysis.
//!
//! Extracts the runner's native test counts, build and RTS analysis times,
//! executed test classes, and the classes an RTS check reported as output.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::Result;

/// Figures pulled out of one build log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogAnalysis {
    /// Sum over every `Results` block.
    pub tests_run: u64,
    pub failures: u64,
    pub errors: u64,
    pub skipped: u64,
    /// Last `Total time:` reported, in seconds.
    pub total_time_secs: f64,
    /// Time spent in RTS analysis, in seconds.
    pub rts_time_secs: f64,
    /// Classes from `Running <class>` lines, in log order.
    pub run_classes: Vec<String>,
    /// Outer classes named by `[RTS CHECK TAG]` lines.
    pub output_classes: BTreeSet<String>,
}

static RESULTS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Tests run:\s*(\d+),\s*Failures:\s*(\d+),\s*Errors:\s*(\d+),\s*Skipped:\s*(\d+)")
        .expect("RESULTS_LINE regex should compile")
});

/// Convert a Maven duration (`12.5 s`, `01:02 min`, `1:30 h`, `42`) to
/// seconds. Unparseable input is zero.
pub fn parse_duration_secs(text: &str) -> f64 {
    let text: String = text.chars().filter(|c| !c.is_whitespace()).collect();

    let split_pair = |s: &str, major: f64, minor: f64| -> Option<f64> {
        match s.split_once(':') {
            Some((a, b)) => Some(a.parse::<f64>().ok()? * major + b.parse::<f64>().ok()? * minor),
            None => Some(s.parse::<f64>().ok()? * major),
        }
    };

    let parsed = if let Some(value) = text.strip_suffix("min") {
        split_pair(value, 60.0, 1.0)
    } else if let Some(value) = text.strip_suffix('h') {
        split_pair(value, 3600.0, 60.0)
    } else if let Some(value) = text.strip_suffix(|c: char| c == 's' || c == 'S') {
        value.parse::<f64>().ok()
    } else {
        text.parse::<f64>().ok()
    };
    parsed.unwrap_or(0.0)
}

/// Analyze the text of a build log.
pub fn analyze_log(text: &str) -> LogAnalysis {
    let lines: Vec<&str> = text.lines().collect();
    let mut out = LogAnalysis::default();

    for (idx, line) in lines.iter().enumerate() {
        if line.contains("Results :") || line.contains("Results:") {
            // Scanning starts on the line right after the header, so a block
            // without Maven's blank `[INFO]` separator still counts and a
            // separator rule directly below the header ends the block.
            let counts = lines[idx + 1..]
                .iter()
                .take_while(|l| !l.contains("[INFO] ---"))
                .find_map(|l| RESULTS_LINE.captures(l));
            if let Some(caps) = counts {
                let n = |i: usize| caps[i].parse::<u64>().unwrap_or(0);
                out.tests_run += n(1);
                out.failures += n(2);
                out.errors += n(3);
                out.skipped += n(4);
            }
        } else if let Some((_, rest)) = line.split_once("Total time:") {
            out.total_time_secs = parse_duration_secs(rest);
        } else if let Some((_, rest)) = line.split_once("JCG Time:") {
            out.rts_time_secs += parse_duration_secs(rest);
        } else if line.contains("nonAffectedClasses size") && line.contains(" final time : ") {
            if let Some((_, rest)) = line.split_once(" final time : ") {
                out.rts_time_secs += parse_duration_secs(rest);
            }
        } else if let Some((_, rest)) = line.split_once("Running ") {
            out.run_classes.push(rest.trim().to_string());
        } else if let Some((_, rest)) = line.split_once("[RTS CHECK TAG] ") {
            let class = rest.split(" -> ").next().unwrap_or_default();
            let outer = class.split('$').next().unwrap_or_default().trim();
            if !outer.is_empty() {
                out.output_classes.insert(outer.to_string());
            }
        }
    }

    out
}

/// Analyze a log file. Invalid UTF-8 is replaced, not rejected.
pub fn analyze_log_file(path: &Path) -> Result<LogAnalysis> {
    let bytes = std::fs::read(path)?;
    Ok(analyze_log(&String::from_utf8_lossy(&bytes)))
}
