//! Error taxonomy for batch orchestration.

use artifact_registry::RegistryError;

use crate::domain::job::JobStatus;

/// incbuild domain errors.
#[derive(Debug, thiserror::Error)]
pub enum IncbuildError {
    /// Invalid batch input. Fatal before any job is scheduled.
    #[error("configuration error: {0}")]
    Config(String),

    /// `log` holds whatever output was captured before the failure.
    #[error("driver failed for {project}: {reason}")]
    DriverFailure {
        project: String,
        reason: String,
        log: Vec<u8>,
    },

    #[error("malformed RTS telemetry: {0}")]
    MalformedTelemetry(String),

    #[error("artifact transport failed: {0}")]
    ArtifactTransport(#[from] RegistryError),

    #[error("illegal job transition for {project}: {from:?} -> {to:?}")]
    IllegalTransition {
        project: String,
        from: JobStatus,
        to: JobStatus,
    },

    /// A record reached aggregation without finishing.
    #[error("job for {project} is not terminal ({status:?})")]
    NonTerminalJob { project: String, status: JobStatus },

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for incbuild domain operations.
pub type Result<T> = std::result::Result<T, IncbuildError>;
