//! Domain models for incbuild.
//!
//! - `Project`: a buildable project and its per-project settings
//! - `JobRecord`: one project's job within a batch
//! - `RtsStats`: normalized test-selection counts
//! - `RunSummary`: the batch outcome

pub mod error;
pub mod job;
pub mod project;
pub mod stats;
pub mod summary;

pub use error::{IncbuildError, Result};
pub use job::{JobFailure, JobRecord, JobStatus};
pub use project::{Project, ProjectConfig, ProjectId, RtsMode};
pub use stats::RtsStats;
pub use summary::RunSummary;
