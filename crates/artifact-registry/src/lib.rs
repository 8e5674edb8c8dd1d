//! Artifact-Registry: build artifact lookup, build, and publication
//!
//! This crate is the artifact layer for incbuild. Every project owns two
//! artifacts: a base image and an incremental-build snapshot taken on top of
//! it. Each may live in the local docker daemon, in the remote registry,
//! both, or neither.
//!
//! The [`ArtifactBackend`] trait is the seam the Cache Gate talks to.
//! [`DockerBackend`] drives the docker CLI and the registry v2 API;
//! [`MemoryBackend`] is an in-memory fake for tests.

pub mod backend;
pub mod docker;
pub mod error;
pub mod memory;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use backend::{ArtifactBackend, BuildContext};
pub use docker::{DockerBackend, RegistryConfig};
pub use error::RegistryError;
pub use memory::MemoryBackend;

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Which of a project's two artifacts is meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Builder image with toolchain and sources, no compiled state.
    Base,
    /// Snapshot committed after a full compile; replays incrementally.
    IncrementalSnapshot,
}

impl ArtifactKind {
    /// Image tag used for this kind.
    pub fn tag(&self) -> &'static str {
        match self {
            ArtifactKind::Base => "base",
            ArtifactKind::IncrementalSnapshot => "inc",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Base => f.write_str("base"),
            ArtifactKind::IncrementalSnapshot => f.write_str("incremental-snapshot"),
        }
    }
}

/// Where an artifact currently exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactLocation {
    Absent,
    LocalOnly,
    RemoteOnly,
    Both,
}

impl ArtifactLocation {
    /// Compose a location from the two presence bits.
    pub fn from_presence(local: bool, remote: bool) -> Self {
        match (local, remote) {
            (false, false) => ArtifactLocation::Absent,
            (true, false) => ArtifactLocation::LocalOnly,
            (false, true) => ArtifactLocation::RemoteOnly,
            (true, true) => ArtifactLocation::Both,
        }
    }

    pub fn has_local(&self) -> bool {
        matches!(self, ArtifactLocation::LocalOnly | ArtifactLocation::Both)
    }

    pub fn has_remote(&self) -> bool {
        matches!(self, ArtifactLocation::RemoteOnly | ArtifactLocation::Both)
    }

    /// Location after a successful local build.
    pub fn with_local(self) -> Self {
        Self::from_presence(true, self.has_remote())
    }

    /// Location after a successful push.
    pub fn with_remote(self) -> Self {
        Self::from_presence(self.has_local(), true)
    }
}

/// Reference to one artifact of one project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Project identifier in `namespace/ecosystem/name` form.
    pub project: String,
    pub kind: ArtifactKind,
}

impl ArtifactRef {
    pub fn new(project: impl Into<String>, kind: ArtifactKind) -> Self {
        Self {
            project: project.into(),
            kind,
        }
    }

    /// Repository path inside a registry namespace, lowercased for docker.
    pub fn repository(&self, namespace: &str) -> String {
        let project = self.project.to_ascii_lowercase();
        if namespace.is_empty() {
            project
        } else {
            format!("{}/{}", namespace.trim_end_matches('/'), project)
        }
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project, self.kind.tag())
    }
}

/// Check if the docker CLI is reachable.
pub async fn is_docker_available() -> bool {
    cli_available("docker").await
}

async fn cli_available(program: &str) -> bool {
    tokio::process::Command::new(program)
        .arg("--version")
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}
