//! Ownership resolution.
//!
//! A test class can be physically present in more than one module. Each
//! copy is owned by the nearest configuration unit enclosing it, and every
//! owner must carry the exclusion in its own declaration for the test to be
//! excluded everywhere.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ExclusionError, Result};
use crate::hierarchy::{ConfigHierarchy, EdgeKind, UnitPath};
use crate::plugins::PluginKey;

/// Source extensions a test class may be written in.
pub const TEST_SOURCE_EXTENSIONS: &[&str] = &["java", "kt", "groovy", "scala"];

/// Directories never searched for sources or build files.
const SKIPPED_DIRS: &[&str] = &["target", "build", "node_modules"];

/// Identifier of a failing test.
///
/// Accepts `FooTest`, `com.acme.FooTest`, `com.acme.FooTest#method` and
/// `com.acme.FooTest$Inner`; all of them name the class `FooTest`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TestId {
    raw: String,
    class_name: String,
}

impl TestId {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let without_method = raw.split('#').next().unwrap_or_default();
        let simple = without_method.rsplit('.').next().unwrap_or_default();
        let class_name = simple.split('$').next().unwrap_or_default();

        let valid = !class_name.is_empty()
            && class_name
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_')
            && !class_name.starts_with(|c: char| c.is_ascii_digit());
        if !valid {
            return Err(ExclusionError::InvalidTestId(raw.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            class_name: class_name.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Exclusion pattern for one source extension, e.g. `**/FooTest.java`.
    pub fn pattern(&self, extension: &str) -> String {
        format!("**/{}.{}", self.class_name, extension)
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for TestId {
    type Error = ExclusionError;

    fn try_from(value: String) -> Result<Self> {
        TestId::parse(&value)
    }
}

impl From<TestId> for String {
    fn from(id: TestId) -> Self {
        id.raw
    }
}

/// Recursively collect files under `dir`, skipping build output and hidden
/// directories.
pub(crate) fn walk_source_tree(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if dir.is_dir() {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref()) {
                    continue;
                }
                files.extend(walk_source_tree(&path)?);
            } else {
                files.push(path);
            }
        }
    }

    Ok(files)
}

/// Every source file under `root` defining the test's class, as
/// root-relative paths in sorted order.
pub fn locate_test_files(root: &Path, test_id: &TestId) -> Result<Vec<PathBuf>> {
    let mut matches: Vec<PathBuf> = walk_source_tree(root)?
        .into_iter()
        .filter(|path| {
            let stem_matches = path
                .file_stem()
                .map(|s| s.to_string_lossy() == test_id.class_name())
                .unwrap_or(false);
            let ext_matches = path
                .extension()
                .map(|e| TEST_SOURCE_EXTENSIONS.contains(&e.to_string_lossy().as_ref()))
                .unwrap_or(false);
            stem_matches && ext_matches
        })
        .filter_map(|path| path.strip_prefix(root).ok().map(Path::to_path_buf))
        .collect();
    matches.sort();
    Ok(matches)
}

/// A unit that must receive the exclusion edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerUnit {
    pub unit: UnitPath,
    /// Copies of the test owned by this unit.
    pub files: Vec<PathBuf>,
    /// One pattern per distinct source extension among `files`.
    pub patterns: Vec<String>,
    /// The unit has no unconditional declaration of the plugin yet.
    pub must_declare: bool,
    /// Unit whose management block supplies defaults for the plugin here.
    pub managed_from: Option<UnitPath>,
}

/// All owners of one test for one plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub test_id: TestId,
    pub plugin: PluginKey,
    pub owners: Vec<OwnerUnit>,
}

impl Resolution {
    pub fn units(&self) -> Vec<UnitPath> {
        self.owners.iter().map(|o| o.unit.clone()).collect()
    }
}

/// Map each located file to its nearest enclosing unit.
///
/// Only those nearest units are returned; their ancestors never are, since
/// an ancestor's declared plugins do not reach its children.
pub fn resolve_owners(
    hierarchy: &ConfigHierarchy,
    test_id: &TestId,
    files: &[PathBuf],
    plugin: &PluginKey,
) -> Result<Resolution> {
    if files.is_empty() {
        return Err(ExclusionError::TestNotFound {
            test_id: test_id.to_string(),
        });
    }

    let mut by_unit: BTreeMap<UnitPath, Vec<PathBuf>> = BTreeMap::new();
    for file in files {
        let unit = hierarchy
            .nearest_unit(file)
            .ok_or_else(|| ExclusionError::NoOwningUnit { file: file.clone() })?;
        by_unit.entry(unit).or_default().push(file.clone());
    }

    let owners = by_unit
        .into_iter()
        .map(|(unit, files)| {
            let mut patterns: Vec<String> = Vec::new();
            for file in &files {
                if let Some(ext) = file.extension() {
                    let pattern = test_id.pattern(&ext.to_string_lossy());
                    if !patterns.contains(&pattern) {
                        patterns.push(pattern);
                    }
                }
            }

            let must_declare = hierarchy
                .inherited_block(&unit, plugin, EdgeKind::DeclarativePlugins)
                .is_none();
            let managed_from = hierarchy
                .managed_defaults(&unit, plugin)
                .map(|(from, _)| from);

            OwnerUnit {
                unit,
                files,
                patterns,
                must_declare,
                managed_from,
            }
        })
        .collect();

    Ok(Resolution {
        test_id: test_id.clone(),
        plugin: plugin.clone(),
        owners,
    })
}
