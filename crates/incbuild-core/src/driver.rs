//! The per-project build/test driver capability.
//!
//! The orchestrator knows nothing about how a project is built or tested.
//! It hands the driver a project and mode flags and gets back an exit code
//! and the combined output; RTS counts are read from that output later.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Project, Result, RtsMode};

/// Mode flags for one driver invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverFlags {
    /// Root under which the driver may place its own outputs.
    pub artifact_root: PathBuf,
    pub rts: RtsMode,
    pub incremental: bool,
}

impl DriverFlags {
    pub fn for_project(project: &Project, artifact_root: impl Into<PathBuf>) -> Self {
        Self {
            artifact_root: artifact_root.into(),
            rts: project.config.rts_mode,
            incremental: project.config.incremental_build_enabled,
        }
    }
}

/// What a driver run produced.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DriverOutput {
    pub exit_code: i32,
    /// Combined stdout and stderr, verbatim.
    pub log: Vec<u8>,
}

impl DriverOutput {
    pub fn new(exit_code: i32, log: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_code,
            log: log.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn log_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.log)
    }
}

/// Runs a project's build and tests.
///
/// `Err` means the driver could not be run at all; a driver that ran and
/// failed returns `Ok` with a nonzero exit code. Implementations must be
/// safe to invoke again for the same project.
#[async_trait]
pub trait ProjectDriver: Send + Sync {
    async fn run(&self, project: &Project, flags: &DriverFlags) -> Result<DriverOutput>;
}
