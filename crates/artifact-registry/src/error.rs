//! Error types for artifact-registry

use thiserror::Error;

/// Errors that can occur while locating, building, or publishing artifacts
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Docker CLI not found
    #[error("docker is not installed or not in PATH")]
    DockerNotFound,

    /// A docker command exited non-zero
    #[error("docker {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Building an artifact failed
    #[error("build of {artifact} failed: {reason}")]
    BuildFailed { artifact: String, reason: String },

    /// Publishing an artifact failed
    #[error("push of {artifact} failed: {reason}")]
    PushFailed { artifact: String, reason: String },

    /// A push was requested for an artifact with no local copy
    #[error("artifact {0} has no local copy to push")]
    NothingToPush(String),

    /// Registry HTTP error
    #[error("registry HTTP error: {0}")]
    Http(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        RegistryError::Http(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_display() {
        let err = RegistryError::CommandFailed {
            command: "push".to_string(),
            stderr: "denied".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("push"));
        assert!(msg.contains("denied"));
    }
}
