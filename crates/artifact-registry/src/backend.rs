//! Backend trait for artifact operations.

use crate::{ArtifactLocation, ArtifactRef, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// Inputs needed to build an artifact.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    /// Directory holding the project's Dockerfile and build scripts.
    pub context_dir: PathBuf,

    /// Command run inside the base image to produce the incremental snapshot.
    pub snapshot_command: Vec<String>,

    /// Extra environment passed to the snapshot container (`KEY=VALUE`).
    pub snapshot_env: Vec<String>,
}

impl BuildContext {
    pub fn new(context_dir: impl Into<PathBuf>) -> Self {
        Self {
            context_dir: context_dir.into(),
            snapshot_command: vec!["compile".to_string()],
            snapshot_env: Vec::new(),
        }
    }

    pub fn with_snapshot_env(mut self, env: Vec<String>) -> Self {
        self.snapshot_env = env;
        self
    }
}

/// Artifact storage and transport.
///
/// Implementations must not mutate artifact state in `locate`, and a failed
/// `build`/`push` must leave the previous location intact.
#[async_trait]
pub trait ArtifactBackend: Send + Sync {
    /// Report where the artifact currently exists.
    async fn locate(&self, artifact: &ArtifactRef) -> Result<ArtifactLocation>;

    /// Build the artifact into local storage.
    async fn build(&self, artifact: &ArtifactRef, ctx: &BuildContext) -> Result<()>;

    /// Publish the local copy of the artifact to the remote registry.
    async fn push(&self, artifact: &ArtifactRef) -> Result<()>;
}
