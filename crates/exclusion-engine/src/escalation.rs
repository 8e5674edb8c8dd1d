//! Two-level exclusion escalation.
//!
//! A failing test first gets excluded from instrumentation only, so it still
//! runs without coverage. If it keeps failing with that exclusion in place it
//! is excluded from execution entirely. A test that fails even then was not
//! actually excluded somewhere, which is reported for manual follow-up.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ExclusionError, Result};
use crate::fragment::render_plugin_fragment;
use crate::hierarchy::{ApplyReport, ConfigHierarchy, UnitPath};
use crate::plugins::{PluginKey, RtsTool, SUREFIRE_VERSION};
use crate::resolver::{locate_test_files, resolve_owners, TestId};

/// How far a test is excluded. Ordered: `Instrumentation < Execution`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionLevel {
    /// Excluded from the RTS tool's instrumentation; still executed.
    Instrumentation,
    /// Not executed at all.
    Execution,
}

impl ExclusionLevel {
    pub fn name(&self) -> &'static str {
        match self {
            ExclusionLevel::Instrumentation => "instrumentation",
            ExclusionLevel::Execution => "execution",
        }
    }

    /// Plugin whose exclusion list implements this level.
    pub fn plugin(&self, tool: RtsTool) -> PluginKey {
        match self {
            ExclusionLevel::Instrumentation => tool.plugin(),
            ExclusionLevel::Execution => PluginKey::surefire(),
        }
    }

    fn default_version(&self, tool: RtsTool) -> &'static str {
        match self {
            ExclusionLevel::Instrumentation => tool.version(),
            ExclusionLevel::Execution => SUREFIRE_VERSION,
        }
    }
}

impl fmt::Display for ExclusionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One recorded level change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelChange {
    pub from: Option<ExclusionLevel>,
    pub to: ExclusionLevel,
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// Exclusion state of one test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionEntry {
    pub test_id: TestId,
    pub level: ExclusionLevel,
    /// Units the exclusion has been applied to.
    #[serde(default)]
    pub owner_units: BTreeSet<UnitPath>,
    #[serde(default)]
    pub history: Vec<LevelChange>,
}

impl ExclusionEntry {
    pub fn new(test_id: TestId, level: ExclusionLevel, reason: impl Into<String>) -> Self {
        Self {
            test_id,
            level,
            owner_units: BTreeSet::new(),
            history: vec![LevelChange {
                from: None,
                to: level,
                at: Utc::now(),
                reason: reason.into(),
            }],
        }
    }

    /// Raise the level. Returns whether anything changed; lowering is an error.
    pub fn raise_to(&mut self, level: ExclusionLevel, reason: impl Into<String>) -> Result<bool> {
        if level < self.level {
            return Err(ExclusionError::LevelRegression {
                test_id: self.test_id.to_string(),
                from: self.level,
                to: level,
            });
        }
        if level == self.level {
            return Ok(false);
        }
        self.history.push(LevelChange {
            from: Some(self.level),
            to: level,
            at: Utc::now(),
            reason: reason.into(),
        });
        self.level = level;
        Ok(true)
    }
}

/// Result of one test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeOutcome {
    Passed,
    Failed,
}

/// A test run once without and once with instrumentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    pub uninstrumented: ProbeOutcome,
    pub instrumented: ProbeOutcome,
}

impl Probe {
    pub fn new(uninstrumented: ProbeOutcome, instrumented: ProbeOutcome) -> Self {
        Self {
            uninstrumented,
            instrumented,
        }
    }
}

/// Initial level for a new failure, or `None` when it does not reproduce.
///
/// A test failing without instrumentation is excluded from execution no
/// matter how it behaves instrumented.
pub fn classify(probe: Probe) -> Option<ExclusionLevel> {
    match (probe.uninstrumented, probe.instrumented) {
        (ProbeOutcome::Passed, ProbeOutcome::Failed) => Some(ExclusionLevel::Instrumentation),
        (ProbeOutcome::Failed, _) => Some(ExclusionLevel::Execution),
        (ProbeOutcome::Passed, ProbeOutcome::Passed) => None,
    }
}

/// What an observation did to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EscalationOutcome {
    Created { level: ExclusionLevel },
    Promoted { from: ExclusionLevel, to: ExclusionLevel },
    Unchanged { level: ExclusionLevel },
    /// Still failing with an execution-level exclusion in place.
    ManualFollowUp { test_id: String },
    NotReproducible,
}

/// Edit to one unit for one plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitEdit {
    pub unit: UnitPath,
    pub plugin: PluginKey,
    pub level: ExclusionLevel,
    pub tests: Vec<String>,
    /// Patterns this edit introduces.
    pub patterns: Vec<String>,
    /// Full exclusion list at the unit once the edit is applied.
    pub merged_excludes: Vec<String>,
    /// The plugin is not yet declared unconditionally at the unit.
    pub declares_plugin: bool,
    /// Rendered `<plugin>` block for the unit's build section.
    pub fragment: String,
}

/// A test whose owners could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedTest {
    pub test_id: String,
    pub reason: String,
}

/// Edits for every entry of an engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditPlan {
    pub edits: Vec<UnitEdit>,
    pub unresolved: Vec<UnresolvedTest>,
}

impl EditPlan {
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn units(&self) -> BTreeSet<UnitPath> {
        self.edits.iter().map(|e| e.unit.clone()).collect()
    }
}

/// Escalation state for one project.
#[derive(Debug, Clone)]
pub struct ExclusionEngine {
    tool: RtsTool,
    entries: BTreeMap<String, ExclusionEntry>,
}

impl ExclusionEngine {
    pub fn new(tool: RtsTool) -> Self {
        Self {
            tool,
            entries: BTreeMap::new(),
        }
    }

    pub fn from_entries(tool: RtsTool, entries: impl IntoIterator<Item = ExclusionEntry>) -> Self {
        Self {
            tool,
            entries: entries
                .into_iter()
                .map(|e| (e.test_id.to_string(), e))
                .collect(),
        }
    }

    pub fn tool(&self) -> RtsTool {
        self.tool
    }

    pub fn entry(&self, test_id: &TestId) -> Option<&ExclusionEntry> {
        self.entries.get(test_id.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = &ExclusionEntry> {
        self.entries.values()
    }

    pub fn into_entries(self) -> Vec<ExclusionEntry> {
        self.entries.into_values().collect()
    }

    /// Record a failure seen during an instrumented run.
    pub fn observe_failure(&mut self, test_id: &TestId) -> EscalationOutcome {
        match self.entries.get_mut(test_id.as_str()) {
            None => {
                let level = ExclusionLevel::Instrumentation;
                self.entries.insert(
                    test_id.to_string(),
                    ExclusionEntry::new(test_id.clone(), level, "failed under instrumentation"),
                );
                info!(test = %test_id, level = %level, "Exclusion created");
                EscalationOutcome::Created { level }
            }
            Some(entry) => {
                let from = entry.level;
                let to = ExclusionLevel::Execution;
                match entry.raise_to(to, "still failing with instrumentation excluded") {
                    Ok(true) => {
                        info!(test = %test_id, "Exclusion promoted to execution");
                        EscalationOutcome::Promoted { from, to }
                    }
                    _ => {
                        warn!(
                            test = %test_id,
                            "Test still fails with execution exclusion applied; check its owning units"
                        );
                        EscalationOutcome::ManualFollowUp {
                            test_id: test_id.to_string(),
                        }
                    }
                }
            }
        }
    }

    /// Record a classified failure. Never lowers an existing entry.
    pub fn record_classification(&mut self, test_id: &TestId, probe: Probe) -> EscalationOutcome {
        let Some(level) = classify(probe) else {
            return EscalationOutcome::NotReproducible;
        };

        match self.entries.get_mut(test_id.as_str()) {
            None => {
                self.entries.insert(
                    test_id.to_string(),
                    ExclusionEntry::new(test_id.clone(), level, format!("classified as {}", level)),
                );
                info!(test = %test_id, level = %level, "Exclusion created from classification");
                EscalationOutcome::Created { level }
            }
            Some(entry) => {
                let from = entry.level;
                // A lower classification is ignored, not an error.
                match entry.raise_to(level, format!("classified as {}", level)) {
                    Ok(true) => EscalationOutcome::Promoted { from, to: level },
                    _ => EscalationOutcome::Unchanged { level: entry.level },
                }
            }
        }
    }

    /// Edits needed for one entry, given the files the test lives in.
    pub fn plan_edits_for(
        &self,
        hierarchy: &ConfigHierarchy,
        test_id: &TestId,
        files: &[PathBuf],
    ) -> Result<Vec<UnitEdit>> {
        let entry = self
            .entry(test_id)
            .ok_or_else(|| ExclusionError::TestNotFound {
                test_id: test_id.to_string(),
            })?;
        let plugin = entry.level.plugin(self.tool);
        let resolution = resolve_owners(hierarchy, test_id, files, &plugin)?;

        let mut scratch = hierarchy.clone();
        let mut edits = Vec::new();
        for owner in resolution.owners {
            let report = scratch.apply_exclusion(&owner.unit, &plugin, &owner.patterns)?;
            edits.push(self.unit_edit(hierarchy, entry, &owner.patterns, report));
        }
        Ok(edits)
    }

    /// Edits for every entry, locating test files under `source_root`.
    ///
    /// Edits landing on the same unit and plugin are merged. Tests that
    /// cannot be located are listed in `unresolved` instead of failing the
    /// whole plan.
    pub fn plan_edits(&self, hierarchy: &ConfigHierarchy, source_root: &Path) -> Result<EditPlan> {
        let mut scratch = hierarchy.clone();
        let mut merged: BTreeMap<(UnitPath, PluginKey), UnitEdit> = BTreeMap::new();
        let mut unresolved = Vec::new();

        for entry in self.entries.values() {
            let files = locate_test_files(source_root, &entry.test_id)?;
            let plugin = entry.level.plugin(self.tool);
            let resolution = match resolve_owners(hierarchy, &entry.test_id, &files, &plugin) {
                Ok(resolution) => resolution,
                Err(e @ (ExclusionError::TestNotFound { .. } | ExclusionError::NoOwningUnit { .. })) => {
                    warn!(test = %entry.test_id, error = %e, "Cannot resolve owners");
                    unresolved.push(UnresolvedTest {
                        test_id: entry.test_id.to_string(),
                        reason: e.to_string(),
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };

            for owner in resolution.owners {
                let report = scratch.apply_exclusion(&owner.unit, &plugin, &owner.patterns)?;
                let key = (owner.unit.clone(), plugin.clone());
                match merged.get_mut(&key) {
                    Some(edit) => {
                        edit.tests.push(entry.test_id.to_string());
                        for pattern in &owner.patterns {
                            if !edit.patterns.contains(pattern) {
                                edit.patterns.push(pattern.clone());
                            }
                        }
                        edit.merged_excludes = report.excludes.clone();
                        edit.fragment = render_plugin_fragment(
                            &edit.plugin,
                            self.fragment_version(hierarchy, &edit.unit, edit.level, &edit.plugin)
                                .as_deref(),
                            &edit.merged_excludes,
                        );
                    }
                    None => {
                        let edit = self.unit_edit(hierarchy, entry, &owner.patterns, report);
                        merged.insert(key, edit);
                    }
                }
            }
        }

        Ok(EditPlan {
            edits: merged.into_values().collect(),
            unresolved,
        })
    }

    /// Apply a plan to the hierarchy and record the owners on each entry.
    pub fn apply(
        &mut self,
        plan: &EditPlan,
        hierarchy: &mut ConfigHierarchy,
    ) -> Result<Vec<ApplyReport>> {
        let mut reports = Vec::with_capacity(plan.edits.len());
        for edit in &plan.edits {
            let report = hierarchy.apply_exclusion(&edit.unit, &edit.plugin, &edit.patterns)?;
            for test in &edit.tests {
                if let Some(entry) = self.entries.get_mut(test) {
                    entry.owner_units.insert(edit.unit.clone());
                }
            }
            info!(
                unit = %edit.unit,
                plugin = %edit.plugin,
                added = report.added.len(),
                "Exclusion edit applied"
            );
            reports.push(report);
        }
        Ok(reports)
    }

    /// Owner units where the entry's exclusion is not in effect.
    ///
    /// Empty means every copy of the test is excluded at the entry's level.
    pub fn missing_owners(
        &self,
        hierarchy: &ConfigHierarchy,
        test_id: &TestId,
        files: &[PathBuf],
    ) -> Result<Vec<UnitPath>> {
        let entry = self
            .entry(test_id)
            .ok_or_else(|| ExclusionError::TestNotFound {
                test_id: test_id.to_string(),
            })?;
        let plugin = entry.level.plugin(self.tool);
        let resolution = resolve_owners(hierarchy, test_id, files, &plugin)?;

        Ok(resolution
            .owners
            .into_iter()
            .filter(|owner| {
                let effective = hierarchy
                    .effective_excludes(&owner.unit, &plugin)
                    .unwrap_or_default();
                !owner.patterns.iter().all(|p| effective.contains(p))
            })
            .map(|owner| owner.unit)
            .collect())
    }

    fn unit_edit(
        &self,
        hierarchy: &ConfigHierarchy,
        entry: &ExclusionEntry,
        patterns: &[String],
        report: ApplyReport,
    ) -> UnitEdit {
        let version = self.fragment_version(hierarchy, &report.unit, entry.level, &report.plugin);
        let fragment = render_plugin_fragment(&report.plugin, version.as_deref(), &report.excludes);
        UnitEdit {
            unit: report.unit,
            plugin: report.plugin,
            level: entry.level,
            tests: vec![entry.test_id.to_string()],
            patterns: patterns.to_vec(),
            merged_excludes: report.excludes,
            declares_plugin: report.declared_locally,
            fragment,
        }
    }

    /// Version written into a fragment: the unit's own, nothing when
    /// management supplies one, the pinned default otherwise.
    fn fragment_version(
        &self,
        hierarchy: &ConfigHierarchy,
        unit: &UnitPath,
        level: ExclusionLevel,
        plugin: &PluginKey,
    ) -> Option<String> {
        if let Some(own) = hierarchy
            .unit(unit)
            .and_then(|u| u.declared_block(plugin))
            .and_then(|b| b.version.clone())
        {
            return Some(own);
        }
        let managed = hierarchy
            .managed_defaults(unit, plugin)
            .and_then(|(_, b)| b.version.clone());
        match managed {
            Some(_) => None,
            None => Some(level.default_version(self.tool).to_string()),
        }
    }
}
