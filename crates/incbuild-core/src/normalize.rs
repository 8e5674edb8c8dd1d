//! Telemetry Normalizer.
//!
//! Drivers running under RTS print three markers before their own summary:
//!
//! ```text
//! [RTS] Total: 100
//! [RTS] Selected: 40
//! [RTS] Excluded: 60
//! ```
//!
//! When all three are present they replace the test runner's own counts.
//! When none are, the runner's count stands in with nothing excluded.
//! Anything in between is malformed.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{IncbuildError, Result, RtsStats};
use crate::log_analysis::analyze_log;

static MARKER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[RTS\]\s+(Total|Selected|Excluded):\s*(\S*)")
        .expect("MARKER_LINE regex should compile")
});

/// Where a job's stats came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetrySource {
    Markers,
    Native,
}

/// Stats for one job plus their origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedTelemetry {
    pub stats: RtsStats,
    pub source: TelemetrySource,
}

/// Marker values found in a log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtsMarkers {
    pub total: Option<u64>,
    pub selected: Option<u64>,
    pub excluded: Option<u64>,
}

impl RtsMarkers {
    pub fn is_empty(&self) -> bool {
        self.total.is_none() && self.selected.is_none() && self.excluded.is_none()
    }
}

fn record(slot: &mut Option<u64>, label: &str, value: u64) -> Result<()> {
    match *slot {
        Some(previous) if previous != value => Err(IncbuildError::MalformedTelemetry(format!(
            "conflicting [RTS] {} markers: {} and {}",
            label, previous, value
        ))),
        _ => {
            *slot = Some(value);
            Ok(())
        }
    }
}

/// Collect the markers in a log. Repeats with the same value are tolerated.
pub fn parse_markers(log: &str) -> Result<RtsMarkers> {
    let mut markers = RtsMarkers::default();
    for caps in log.lines().filter_map(|line| MARKER_LINE.captures(line)) {
        let label = &caps[1];
        let raw = &caps[2];
        let value: u64 = raw.parse().map_err(|_| {
            IncbuildError::MalformedTelemetry(format!(
                "[RTS] {} marker has non-integer value {:?}",
                label, raw
            ))
        })?;
        let slot = match label {
            "Total" => &mut markers.total,
            "Selected" => &mut markers.selected,
            _ => &mut markers.excluded,
        };
        record(slot, label, value)?;
    }

    Ok(markers)
}

/// Derive the stats for a job from its log.
pub fn normalize(log: &str) -> Result<NormalizedTelemetry> {
    let markers = parse_markers(log)?;

    if markers.is_empty() {
        let tests_run = analyze_log(log).tests_run;
        return Ok(NormalizedTelemetry {
            stats: RtsStats::all_selected(tests_run),
            source: TelemetrySource::Native,
        });
    }

    match (markers.total, markers.selected, markers.excluded) {
        (Some(total), Some(selected), Some(excluded)) => Ok(NormalizedTelemetry {
            stats: RtsStats::new(total, selected, excluded)?,
            source: TelemetrySource::Markers,
        }),
        _ => Err(IncbuildError::MalformedTelemetry(format!(
            "incomplete [RTS] markers (total: {:?}, selected: {:?}, excluded: {:?})",
            markers.total, markers.selected, markers.excluded
        ))),
    }
}
