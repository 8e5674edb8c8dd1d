//! Persisted exclusion state of a project.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{ExclusionError, Result};
use crate::escalation::{ExclusionEngine, ExclusionEntry, ExclusionLevel};
use crate::plugins::RtsTool;
use crate::resolver::TEST_SOURCE_EXTENSIONS;

/// Ledger file name inside a project directory.
pub const LEDGER_FILE: &str = "exclusions.json";

/// Flat exclude list consumed by RTS initialization.
pub const EXCLUDE_FILE: &str = "exclude_tests.txt";

/// Exclusion entries of one project, as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExclusionLedger {
    pub project: String,
    pub tool: RtsTool,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub entries: Vec<ExclusionEntry>,
}

impl ExclusionLedger {
    pub fn new(project: impl Into<String>, tool: RtsTool) -> Self {
        Self {
            project: project.into(),
            tool,
            updated_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    /// Default ledger location for a project directory.
    pub fn path_in(project_dir: &Path) -> PathBuf {
        project_dir.join(LEDGER_FILE)
    }

    /// Read a ledger; `None` if the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn load_or_new(path: &Path, project: &str, tool: RtsTool) -> Result<Self> {
        Ok(Self::load(path)?.unwrap_or_else(|| Self::new(project, tool)))
    }

    /// Write the ledger atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, self)?;
        tmp.write_all(b"\n")?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn engine(&self) -> ExclusionEngine {
        ExclusionEngine::from_entries(self.tool, self.entries.clone())
    }

    /// Take the engine's entries, refusing to lower any stored level.
    pub fn update_from(&mut self, engine: &ExclusionEngine) -> Result<()> {
        for stored in &self.entries {
            if let Some(next) = engine.entry(&stored.test_id) {
                if next.level < stored.level {
                    return Err(ExclusionError::LevelRegression {
                        test_id: stored.test_id.to_string(),
                        from: stored.level,
                        to: next.level,
                    });
                }
            }
        }

        let mut merged: Vec<ExclusionEntry> = engine.entries().cloned().collect();
        for stored in &self.entries {
            if engine.entry(&stored.test_id).is_none() {
                merged.push(stored.clone());
            }
        }
        merged.sort_by(|a, b| a.test_id.cmp(&b.test_id));

        self.entries = merged;
        self.tool = engine.tool();
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn count_at(&self, level: ExclusionLevel) -> usize {
        self.entries.iter().filter(|e| e.level == level).count()
    }
}

/// One pattern per line for every instrumentation-level entry.
pub fn render_exclude_file(entries: &[ExclusionEntry]) -> String {
    let mut out = String::new();
    for entry in entries
        .iter()
        .filter(|e| e.level == ExclusionLevel::Instrumentation)
    {
        for ext in TEST_SOURCE_EXTENSIONS {
            out.push_str(&entry.test_id.pattern(ext));
            out.push('\n');
        }
    }
    out
}
