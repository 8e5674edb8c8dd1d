//! Cache Gate: decides whether an artifact has to be built or pushed.
//!
//! The decisions themselves are pure functions of the artifact location and
//! the force flags. [`CacheGate::ensure`] applies them against an
//! [`ArtifactBackend`].

use std::sync::Arc;

use artifact_registry::{
    ArtifactBackend, ArtifactKind, ArtifactLocation, ArtifactRef, BuildContext,
};
use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::domain::{Project, Result};
use crate::obs::emit_cache_decision;

/// Build step decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildDecision {
    Build,
    Skip,
}

/// Push step decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushDecision {
    Push,
    Skip,
}

/// Build unless a local copy exists and no rebuild is forced.
///
/// A remote-only artifact is built, since the job needs a local copy.
pub fn decide_build(location: ArtifactLocation, force_rebuild: bool) -> BuildDecision {
    if location.has_local() && !force_rebuild {
        BuildDecision::Skip
    } else {
        BuildDecision::Build
    }
}

/// Push unless the registry already has the artifact and no push is forced.
pub fn decide_push(location: ArtifactLocation, force_push: bool) -> PushDecision {
    if location.has_remote() && !force_push {
        PushDecision::Skip
    } else {
        PushDecision::Push
    }
}

/// What the gate did for one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateReport {
    pub artifact: ArtifactRef,
    pub build: BuildDecision,
    /// `None` when the run's push mode does not cover this kind.
    pub push: Option<PushDecision>,
    /// Location after the gate ran.
    pub location: ArtifactLocation,
}

/// Applies build/push decisions for a project's artifacts.
pub struct CacheGate {
    backend: Arc<dyn ArtifactBackend>,
    config: Arc<RunConfig>,
}

impl CacheGate {
    pub fn new(backend: Arc<dyn ArtifactBackend>, config: Arc<RunConfig>) -> Self {
        Self { backend, config }
    }

    /// Make sure `kind` exists locally (and remotely when the push mode
    /// covers it). A failed build or push is returned as-is, not retried.
    pub async fn ensure(&self, project: &Project, kind: ArtifactKind) -> Result<GateReport> {
        let artifact = ArtifactRef::new(project.id.to_string(), kind);
        let mut location = self.backend.locate(&artifact).await?;

        let build = decide_build(location, self.config.force_rebuild);
        if build == BuildDecision::Build {
            let ctx = build_context(project);
            self.backend.build(&artifact, &ctx).await?;
            location = location.with_local();
        }

        let push = if self.config.push_mode.covers(kind) {
            let decision = decide_push(location, self.config.force_push);
            if decision == PushDecision::Push {
                self.backend.push(&artifact).await?;
                location = location.with_remote();
            }
            Some(decision)
        } else {
            None
        };

        emit_cache_decision(&project.id.to_string(), kind, build, push);

        Ok(GateReport {
            artifact,
            build,
            push,
            location,
        })
    }
}

fn build_context(project: &Project) -> BuildContext {
    let mut env = Vec::new();
    if let Some(tool) = project.config.rts_mode.tool() {
        env.push("RTS_ON=1".to_string());
        env.push(format!("RTS_TOOL={}", tool));
    }
    BuildContext::new(&project.path).with_snapshot_env(env)
}
