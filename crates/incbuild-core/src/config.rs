//! Run configuration and batch manifest.
//!
//! A [`RunConfig`] is built once per run, wrapped in an `Arc`, and handed to
//! every component. Nothing re-derives flags from the environment mid-run.

use std::collections::HashSet;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use artifact_registry::{ArtifactKind, RegistryConfig};
use serde::{Deserialize, Serialize};

use crate::domain::{IncbuildError, Project, ProjectId, Result, RtsMode};

/// Which artifact kinds get published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushMode {
    #[default]
    None,
    Base,
    #[serde(rename = "inc", alias = "incremental")]
    Incremental,
    Both,
}

impl PushMode {
    pub fn covers(&self, kind: ArtifactKind) -> bool {
        match (self, kind) {
            (PushMode::Both, _) => true,
            (PushMode::Base, ArtifactKind::Base) => true,
            (PushMode::Incremental, ArtifactKind::IncrementalSnapshot) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PushMode::None => "none",
            PushMode::Base => "base",
            PushMode::Incremental => "inc",
            PushMode::Both => "both",
        }
    }
}

impl fmt::Display for PushMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PushMode {
    type Err = IncbuildError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(PushMode::None),
            "base" => Ok(PushMode::Base),
            "inc" | "incremental" => Ok(PushMode::Incremental),
            "both" => Ok(PushMode::Both),
            other => Err(IncbuildError::Config(format!(
                "unknown push mode {:?} (expected none, base, inc or both)",
                other
            ))),
        }
    }
}

/// Settings shared by every job of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub worker_count: NonZeroUsize,
    pub push_mode: PushMode,
    pub force_rebuild: bool,
    pub force_push: bool,
    /// Root under which each project gets its own result directory.
    pub artifact_root: PathBuf,
    pub registry: RegistryConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            worker_count: std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN),
            push_mode: PushMode::None,
            force_rebuild: false,
            force_push: false,
            artifact_root: PathBuf::from("incbuild-results"),
            registry: RegistryConfig::from_env(),
        }
    }
}

impl RunConfig {
    pub fn new(artifact_root: impl Into<PathBuf>) -> Self {
        RunConfig {
            artifact_root: artifact_root.into(),
            ..Self::default()
        }
    }

    /// Set the worker pool size; zero is a configuration error.
    pub fn with_workers(mut self, workers: usize) -> Result<Self> {
        self.worker_count = NonZeroUsize::new(workers).ok_or_else(|| {
            IncbuildError::Config("worker count must be a positive integer".to_string())
        })?;
        Ok(self)
    }

    pub fn with_push_mode(mut self, push_mode: PushMode) -> Self {
        self.push_mode = push_mode;
        self
    }

    pub fn with_force_rebuild(mut self, force: bool) -> Self {
        self.force_rebuild = force;
        self
    }

    pub fn with_force_push(mut self, force: bool) -> Self {
        self.force_push = force;
        self
    }

    pub fn with_registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    /// The part of the configuration echoed into reports.
    pub fn echo(&self) -> ConfigEcho {
        ConfigEcho {
            worker_count: self.worker_count.get(),
            push_mode: self.push_mode,
            force_rebuild: self.force_rebuild,
            force_push: self.force_push,
        }
    }
}

/// Configuration values reported alongside a batch summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEcho {
    pub worker_count: usize,
    pub push_mode: PushMode,
    pub force_rebuild: bool,
    pub force_push: bool,
}

/// One `[[project]]` entry of a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestProject {
    pub id: String,
    /// Project directory; defaults to `<namespace>/<ecosystem>/<name>`
    /// next to the manifest.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub incremental: bool,
    #[serde(default)]
    pub rts: RtsMode,
}

/// Batch manifest, e.g.
///
/// ```toml
/// [[project]]
/// id = "oss/jvm/commons-lang"
/// path = "projects/commons-lang"
/// incremental = true
/// rts = "ekstazi"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchManifest {
    #[serde(default, rename = "project")]
    pub projects: Vec<ManifestProject>,
}

impl BatchManifest {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text)
            .map_err(|e| IncbuildError::Config(format!("invalid batch manifest: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            IncbuildError::Config(format!("cannot read manifest {:?}: {}", path, e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Projects in manifest order, relative paths resolved against `base_dir`.
    pub fn projects(&self, base_dir: &Path) -> Result<Vec<Project>> {
        self.projects
            .iter()
            .map(|entry| {
                let id: ProjectId = entry.id.parse()?;
                let path = match &entry.path {
                    Some(p) if p.is_absolute() => p.clone(),
                    Some(p) => base_dir.join(p),
                    None => base_dir.join(id.rel_dir()),
                };
                Ok(Project::new(id, path)
                    .with_incremental(entry.incremental)
                    .with_rts(entry.rts))
            })
            .collect()
    }
}

/// Reject batches the scheduler must not start.
pub fn validate_projects(projects: &[Project]) -> Result<()> {
    let mut seen = HashSet::new();
    for project in projects {
        if !seen.insert(&project.id) {
            return Err(IncbuildError::Config(format!(
                "duplicate project id: {}",
                project.id
            )));
        }
        if !project.path.is_dir() {
            return Err(IncbuildError::Config(format!(
                "project directory for {} does not exist: {:?}",
                project.id, project.path
            )));
        }
    }
    Ok(())
}
