//! Build-configuration hierarchy.
//!
//! A hierarchy is a tree of configuration units (one per module). Each
//! parent link carries two kinds of inheritance, and they behave
//! differently:
//!
//! - [`EdgeKind::DeclarativePlugins`] is non-transitive. A unit's own
//!   `build/plugins` entries never reach its children.
//! - [`EdgeKind::PluginManagement`] is transitive, but only takes effect in
//!   a descendant that declares the same plugin itself.
//!
//! Every query here is a pure function over the in-memory structure, so the
//! resolver can be exercised without a real file tree.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ExclusionError, Result};
use crate::plugins::PluginKey;

/// Location of a configuration unit, relative to the source root.
///
/// The root unit is `"."`; nested units use forward-slash relative paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitPath(String);

impl UnitPath {
    pub fn new(path: impl AsRef<str>) -> Self {
        let trimmed = path
            .as_ref()
            .trim()
            .trim_start_matches("./")
            .trim_end_matches('/')
            .replace('\\', "/");
        if trimmed.is_empty() || trimmed == "." {
            UnitPath(".".to_string())
        } else {
            UnitPath(trimmed)
        }
    }

    pub fn root() -> Self {
        UnitPath(".".to_string())
    }

    /// Build a unit path from a directory relative to the source root.
    pub fn from_dir(dir: &Path) -> Self {
        let parts: Vec<String> = dir
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        UnitPath::new(parts.join("/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "."
    }

    /// Directory of the unit relative to the source root.
    pub fn dir(&self) -> PathBuf {
        if self.is_root() {
            PathBuf::new()
        } else {
            PathBuf::from(&self.0)
        }
    }

    fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.split('/').count()
        }
    }

    /// Whether a root-relative file path lies inside this unit's directory.
    pub fn contains(&self, file: &Path) -> bool {
        self.is_root() || file.starts_with(self.dir())
    }
}

impl fmt::Display for UnitPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inheritance kind carried by a parent link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    DeclarativePlugins,
    PluginManagement,
}

/// A plugin entry in a unit's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginBlock {
    pub plugin: PluginKey,
    pub version: Option<String>,
    /// Exclusion patterns, in document order, without duplicates.
    pub excludes: Vec<String>,
    /// Profile id when the block only applies under a profile.
    pub profile: Option<String>,
}

impl PluginBlock {
    pub fn new(plugin: PluginKey) -> Self {
        Self {
            plugin,
            version: None,
            excludes: Vec::new(),
            profile: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_excludes<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.merge_excludes(patterns.into_iter().map(Into::into));
        self
    }

    pub fn in_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn is_conditional(&self) -> bool {
        self.profile.is_some()
    }

    /// Set-union patterns into the block, keeping existing order. Returns
    /// the patterns that were actually added.
    pub fn merge_excludes<I>(&mut self, patterns: I) -> Vec<String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut added = Vec::new();
        for pattern in patterns {
            if !self.excludes.contains(&pattern) {
                self.excludes.push(pattern.clone());
                added.push(pattern);
            }
        }
        added
    }
}

/// One node of the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigUnit {
    pub path: UnitPath,
    pub parent: Option<UnitPath>,
    /// `build/plugins` entries, conditional ones carry a profile id.
    pub declared: Vec<PluginBlock>,
    /// `build/pluginManagement/plugins` entries.
    pub managed: Vec<PluginBlock>,
    /// Bumped on every edit applied to this unit.
    #[serde(default)]
    pub revision: u64,
}

impl ConfigUnit {
    pub fn new(path: UnitPath, parent: Option<UnitPath>) -> Self {
        Self {
            path,
            parent,
            declared: Vec::new(),
            managed: Vec::new(),
            revision: 0,
        }
    }

    pub fn declare(mut self, block: PluginBlock) -> Self {
        self.declared.push(block);
        self
    }

    pub fn manage(mut self, block: PluginBlock) -> Self {
        self.managed.push(block);
        self
    }

    /// The unit's own always-applied declaration of `plugin`.
    pub fn declared_block(&self, plugin: &PluginKey) -> Option<&PluginBlock> {
        self.declared
            .iter()
            .find(|b| &b.plugin == plugin && !b.is_conditional())
    }

    /// Profile-scoped declarations of `plugin`.
    pub fn conditional_blocks<'a>(
        &'a self,
        plugin: &'a PluginKey,
    ) -> impl Iterator<Item = &'a PluginBlock> + 'a {
        self.declared
            .iter()
            .filter(move |b| &b.plugin == plugin && b.is_conditional())
    }

    pub fn managed_block(&self, plugin: &PluginKey) -> Option<&PluginBlock> {
        self.managed.iter().find(|b| &b.plugin == plugin)
    }
}

/// What an edit changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub unit: UnitPath,
    pub plugin: PluginKey,
    /// The unit had no unconditional declaration and one was created.
    pub declared_locally: bool,
    pub added: Vec<String>,
    /// Full pattern list at the unit after the edit.
    pub excludes: Vec<String>,
}

impl ApplyReport {
    pub fn changed(&self) -> bool {
        self.declared_locally || !self.added.is_empty()
    }
}

/// A tree of configuration units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigHierarchy {
    units: BTreeMap<UnitPath, ConfigUnit>,
}

impl ConfigHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, unit: ConfigUnit) -> Result<()> {
        if self.units.contains_key(&unit.path) {
            return Err(ExclusionError::DuplicateUnit(unit.path.to_string()));
        }
        self.units.insert(unit.path.clone(), unit);
        Ok(())
    }

    pub fn with_unit(mut self, unit: ConfigUnit) -> Result<Self> {
        self.insert(unit)?;
        Ok(self)
    }

    pub fn unit(&self, path: &UnitPath) -> Option<&ConfigUnit> {
        self.units.get(path)
    }

    pub fn units(&self) -> impl Iterator<Item = &ConfigUnit> {
        self.units.values()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn revision(&self, path: &UnitPath) -> Option<u64> {
        self.units.get(path).map(|u| u.revision)
    }

    /// Ancestors of `path`, nearest first. Stops at a missing parent or a cycle.
    pub fn ancestors(&self, path: &UnitPath) -> Vec<UnitPath> {
        let mut out = Vec::new();
        let mut seen = BTreeSet::new();
        seen.insert(path.clone());
        let mut current = self.units.get(path).and_then(|u| u.parent.clone());
        while let Some(parent) = current {
            if !seen.insert(parent.clone()) {
                break;
            }
            current = self.units.get(&parent).and_then(|u| u.parent.clone());
            out.push(parent);
        }
        out
    }

    /// Nearest unit whose directory encloses a root-relative file path.
    pub fn nearest_unit(&self, file: &Path) -> Option<UnitPath> {
        self.units
            .keys()
            .filter(|p| p.contains(file))
            .max_by_key(|p| p.depth())
            .cloned()
    }

    /// Block for `plugin` that reaches `path` through edges of `kind`.
    ///
    /// Declarative plugins never cross an edge, so only the unit's own
    /// unconditional declaration counts. Management is looked up in the unit
    /// and its ancestors, and only when the unit declares the plugin.
    pub fn inherited_block(
        &self,
        path: &UnitPath,
        plugin: &PluginKey,
        kind: EdgeKind,
    ) -> Option<(UnitPath, &PluginBlock)> {
        let unit = self.units.get(path)?;
        let declared = unit.declared_block(plugin)?;
        match kind {
            EdgeKind::DeclarativePlugins => Some((path.clone(), declared)),
            EdgeKind::PluginManagement => self.managed_defaults(path, plugin),
        }
    }

    /// Nearest management block for `plugin` in the unit or its ancestors,
    /// whether or not the unit declares the plugin.
    pub fn managed_defaults(
        &self,
        path: &UnitPath,
        plugin: &PluginKey,
    ) -> Option<(UnitPath, &PluginBlock)> {
        std::iter::once(path.clone())
            .chain(self.ancestors(path))
            .find_map(|p| {
                self.units
                    .get(&p)
                    .and_then(|u| u.managed_block(plugin))
                    .map(|b| (p.clone(), b))
            })
    }

    /// Patterns the plugin actually runs with at `path`.
    ///
    /// `None` means the plugin is not declared unconditionally at the unit,
    /// so no exclusion list applies there.
    pub fn effective_excludes(&self, path: &UnitPath, plugin: &PluginKey) -> Option<Vec<String>> {
        let (_, declared) = self.inherited_block(path, plugin, EdgeKind::DeclarativePlugins)?;
        if !declared.excludes.is_empty() {
            return Some(declared.excludes.clone());
        }
        Some(
            self.inherited_block(path, plugin, EdgeKind::PluginManagement)
                .map(|(_, b)| b.excludes.clone())
                .unwrap_or_default(),
        )
    }

    /// Add exclusion patterns to the unit's own unconditional declaration.
    ///
    /// A missing declaration is created. A local list that is still empty is
    /// seeded with the managed defaults first, since a local `excludes`
    /// replaces the inherited one. Profile-scoped blocks and ancestors are
    /// never touched.
    pub fn apply_exclusion(
        &mut self,
        path: &UnitPath,
        plugin: &PluginKey,
        patterns: &[String],
    ) -> Result<ApplyReport> {
        let managed_excludes = self
            .managed_defaults(path, plugin)
            .map(|(_, b)| b.excludes.clone())
            .unwrap_or_default();

        let unit = self
            .units
            .get_mut(path)
            .ok_or_else(|| ExclusionError::UnknownUnit(path.to_string()))?;

        let mut declared_locally = false;
        let idx = match unit
            .declared
            .iter()
            .position(|b| &b.plugin == plugin && !b.is_conditional())
        {
            Some(idx) => idx,
            None => {
                unit.declared.push(PluginBlock::new(plugin.clone()));
                declared_locally = true;
                unit.declared.len() - 1
            }
        };

        let block = &mut unit.declared[idx];
        if block.excludes.is_empty() {
            block.merge_excludes(managed_excludes);
        }
        let added = block.merge_excludes(patterns.iter().cloned());
        let excludes = block.excludes.clone();

        if declared_locally || !added.is_empty() {
            unit.revision += 1;
        }

        Ok(ApplyReport {
            unit: path.clone(),
            plugin: plugin.clone(),
            declared_locally,
            added,
            excludes,
        })
    }
}
