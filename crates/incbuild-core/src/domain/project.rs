//! Projects taking part in a batch.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use exclusion_engine::RtsTool;
use serde::{Deserialize, Serialize};

use crate::domain::error::{IncbuildError, Result};

/// `namespace/ecosystem/name` identifier of a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectId {
    namespace: String,
    ecosystem: String,
    name: String,
}

impl ProjectId {
    /// Build an id from its segments. Each must be a single path segment
    /// of ASCII letters, digits, `-`, `_` or `.`.
    pub fn new(
        namespace: impl Into<String>,
        ecosystem: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self> {
        let id = Self {
            namespace: namespace.into(),
            ecosystem: ecosystem.into(),
            name: name.into(),
        };
        if [&id.namespace, &id.ecosystem, &id.name]
            .iter()
            .all(|s| valid_segment(s))
        {
            Ok(id)
        } else {
            Err(IncbuildError::Config(format!(
                "malformed project id {:?}: expected namespace/ecosystem/name",
                id.to_string()
            )))
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn ecosystem(&self) -> &str {
        &self.ecosystem
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Relative directory for this project's artifacts.
    pub fn rel_dir(&self) -> PathBuf {
        PathBuf::from(&self.namespace)
            .join(&self.ecosystem)
            .join(&self.name)
    }
}

fn valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl FromStr for ProjectId {
    type Err = IncbuildError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [ns, eco, name] => ProjectId::new(*ns, *eco, *name),
            _ => Err(IncbuildError::Config(format!(
                "malformed project id {:?}: expected namespace/ecosystem/name",
                s
            ))),
        }
    }
}

impl TryFrom<String> for ProjectId {
    type Error = IncbuildError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ProjectId> for String {
    fn from(id: ProjectId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.ecosystem, self.name)
    }
}

/// RTS tool a project runs under, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RtsMode {
    #[default]
    None,
    Ekstazi,
    Jcgeks,
}

impl RtsMode {
    pub fn tool(&self) -> Option<RtsTool> {
        match self {
            RtsMode::None => None,
            RtsMode::Ekstazi => Some(RtsTool::Ekstazi),
            RtsMode::Jcgeks => Some(RtsTool::Jcgeks),
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, RtsMode::None)
    }
}

impl fmt::Display for RtsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tool() {
            Some(tool) => write!(f, "{}", tool),
            None => f.write_str("none"),
        }
    }
}

/// Per-project settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub incremental_build_enabled: bool,
    #[serde(default)]
    pub rts_mode: RtsMode,
}

/// A project in a batch. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub path: PathBuf,
    pub config: ProjectConfig,
}

impl Project {
    pub fn new(id: ProjectId, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            path: path.into(),
            config: ProjectConfig::default(),
        }
    }

    pub fn with_incremental(mut self, enabled: bool) -> Self {
        self.config.incremental_build_enabled = enabled;
        self
    }

    pub fn with_rts(mut self, mode: RtsMode) -> Self {
        self.config.rts_mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_id_parse_and_display() {
        let id: ProjectId = "oss/jvm/commons-lang".parse().unwrap();
        assert_eq!(id.namespace(), "oss");
        assert_eq!(id.ecosystem(), "jvm");
        assert_eq!(id.name(), "commons-lang");
        assert_eq!(id.to_string(), "oss/jvm/commons-lang");
        assert_eq!(id.rel_dir(), PathBuf::from("oss/jvm/commons-lang"));
    }

    #[test]
    fn test_project_id_rejects_malformed() {
        for bad in ["alpha", "a/b", "a/b/c/d", "a//c", "a/../c", "a/b/c d"] {
            assert!(bad.parse::<ProjectId>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_project_id_new_checks_segments() {
        assert!(ProjectId::new("oss", "jvm", "commons-lang").is_ok());
        for (ns, eco, name) in [("oss", "jvm", "a/b"), ("", "jvm", "alpha"), ("oss", "..", "alpha")] {
            let err = ProjectId::new(ns, eco, name).unwrap_err();
            assert!(matches!(err, IncbuildError::Config(_)), "{ns}/{eco}/{name}");
        }
    }

    #[test]
    fn test_project_id_serde_as_string() {
        let id = ProjectId::new("oss", "jvm", "alpha").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"oss/jvm/alpha\"");
        let back: ProjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_rts_mode_tool() {
        assert_eq!(RtsMode::None.tool(), None);
        assert_eq!(RtsMode::Jcgeks.tool(), Some(RtsTool::Jcgeks));
        assert!(RtsMode::Ekstazi.is_active());
        assert_eq!(RtsMode::Ekstazi.to_string(), "ekstazi");
    }
}
