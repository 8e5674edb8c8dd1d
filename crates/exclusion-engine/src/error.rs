//! Error types for the exclusion engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::escalation::ExclusionLevel;

/// Errors produced while resolving owners or escalating exclusions.
#[derive(Debug, Error)]
pub enum ExclusionError {
    /// No source file matches the test identifier.
    #[error("no source file found for test {test_id}")]
    TestNotFound { test_id: String },

    /// A matching file sits outside every configuration unit.
    #[error("file {file:?} is not inside any configuration unit")]
    NoOwningUnit { file: PathBuf },

    #[error("unknown configuration unit: {0}")]
    UnknownUnit(String),

    #[error("configuration unit registered twice: {0}")]
    DuplicateUnit(String),

    #[error("invalid test identifier: {0:?}")]
    InvalidTestId(String),

    #[error("unknown RTS tool: {0}")]
    UnknownTool(String),

    /// A pom.xml could not be parsed.
    #[error("failed to parse {path:?}: {reason}")]
    Pom { path: PathBuf, reason: String },

    /// A persisted ledger tried to lower an entry's level.
    #[error("exclusion for {test_id} cannot move from {from:?} to {to:?}")]
    LevelRegression {
        test_id: String,
        from: ExclusionLevel,
        to: ExclusionLevel,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for exclusion engine operations.
pub type Result<T> = std::result::Result<T, ExclusionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_regression_display() {
        let err = ExclusionError::LevelRegression {
            test_id: "FooTest".to_string(),
            from: ExclusionLevel::Execution,
            to: ExclusionLevel::Instrumentation,
        };
        let msg = err.to_string();
        assert!(msg.contains("FooTest"));
        assert!(msg.contains("Execution"));
    }
}
