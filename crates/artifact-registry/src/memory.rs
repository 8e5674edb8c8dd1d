//! In-memory artifact backend (testing only)
//!
//! Tracks artifact locations in a `HashMap` and counts build/push calls so
//! tests can assert on what the Cache Gate actually did.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backend::{ArtifactBackend, BuildContext};
use crate::error::RegistryError;
use crate::{ArtifactLocation, ArtifactRef, Result};

#[derive(Debug, Default)]
struct MemoryState {
    locations: HashMap<ArtifactRef, ArtifactLocation>,
    failing_builds: HashSet<ArtifactRef>,
    failing_pushes: HashSet<ArtifactRef>,
    builds: Vec<ArtifactRef>,
    pushes: Vec<ArtifactRef>,
}

/// In-memory artifact backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the location of an artifact.
    pub fn set_location(&self, artifact: ArtifactRef, location: ArtifactLocation) {
        self.state.lock().unwrap().locations.insert(artifact, location);
    }

    /// Current location without going through the trait.
    pub fn location(&self, artifact: &ArtifactRef) -> ArtifactLocation {
        self.state
            .lock()
            .unwrap()
            .locations
            .get(artifact)
            .copied()
            .unwrap_or(ArtifactLocation::Absent)
    }

    /// Make every future build of `artifact` fail.
    pub fn fail_builds_of(&self, artifact: ArtifactRef) {
        self.state.lock().unwrap().failing_builds.insert(artifact);
    }

    /// Make every future push of `artifact` fail.
    pub fn fail_pushes_of(&self, artifact: ArtifactRef) {
        self.state.lock().unwrap().failing_pushes.insert(artifact);
    }

    /// Artifacts built so far, in call order.
    pub fn builds(&self) -> Vec<ArtifactRef> {
        self.state.lock().unwrap().builds.clone()
    }

    /// Artifacts pushed so far, in call order.
    pub fn pushes(&self) -> Vec<ArtifactRef> {
        self.state.lock().unwrap().pushes.clone()
    }
}

#[async_trait]
impl ArtifactBackend for MemoryBackend {
    async fn locate(&self, artifact: &ArtifactRef) -> Result<ArtifactLocation> {
        Ok(self.location(artifact))
    }

    async fn build(&self, artifact: &ArtifactRef, _ctx: &BuildContext) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.builds.push(artifact.clone());
        if state.failing_builds.contains(artifact) {
            return Err(RegistryError::BuildFailed {
                artifact: artifact.to_string(),
                reason: "injected build failure".to_string(),
            });
        }
        let current = state
            .locations
            .get(artifact)
            .copied()
            .unwrap_or(ArtifactLocation::Absent);
        state.locations.insert(artifact.clone(), current.with_local());
        Ok(())
    }

    async fn push(&self, artifact: &ArtifactRef) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.pushes.push(artifact.clone());
        let current = state
            .locations
            .get(artifact)
            .copied()
            .unwrap_or(ArtifactLocation::Absent);
        if !current.has_local() {
            return Err(RegistryError::NothingToPush(artifact.to_string()));
        }
        if state.failing_pushes.contains(artifact) {
            return Err(RegistryError::PushFailed {
                artifact: artifact.to_string(),
                reason: "injected push failure".to_string(),
            });
        }
        state.locations.insert(artifact.clone(), current.with_remote());
        Ok(())
    }
}
