//! Per-project result storage.
//!
//! Every project writes under its own directory
//! `<root>/<namespace>/<ecosystem>/<name>/`, so jobs never touch each
//! other's files and no locking is needed.

use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::domain::{JobRecord, ProjectId, Result};

/// File holding the driver's combined output.
pub const LOG_FILE: &str = "driver.log";

/// File holding the job's terminal record.
pub const RESULT_FILE: &str = "result.json";

/// Filesystem store for job logs and results.
#[derive(Debug, Clone)]
pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_dir(&self, id: &ProjectId) -> PathBuf {
        self.root.join(id.rel_dir())
    }

    pub fn log_path(&self, id: &ProjectId) -> PathBuf {
        self.project_dir(id).join(LOG_FILE)
    }

    pub fn result_path(&self, id: &ProjectId) -> PathBuf {
        self.project_dir(id).join(RESULT_FILE)
    }

    /// Create the project's directory.
    pub fn prepare(&self, id: &ProjectId) -> Result<PathBuf> {
        let dir = self.project_dir(id);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Store the log verbatim; returns its path and hex SHA-256.
    pub fn write_log(&self, id: &ProjectId, log: &[u8]) -> Result<(PathBuf, String)> {
        let path = self.log_path(id);
        write_atomic(&path, log)?;
        let digest = hex::encode(Sha256::digest(log));
        Ok((path, digest))
    }

    /// Persist a record as pretty JSON; returns its path.
    pub fn write_result(&self, record: &JobRecord) -> Result<PathBuf> {
        let path = self.result_path(&record.project_id);
        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&path, &json)?;
        Ok(path)
    }

    pub fn read_result(&self, id: &ProjectId) -> Result<JobRecord> {
        let bytes = std::fs::read(self.result_path(id))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobStatus;
    use tempfile::tempdir;

    #[test]
    fn test_project_dirs_are_partitioned() {
        let store = ResultStore::new("/results");
        let a = ProjectId::new("oss", "jvm", "alpha").unwrap();
        let b = ProjectId::new("oss", "jvm", "beta").unwrap();
        assert_eq!(
            store.log_path(&a),
            PathBuf::from("/results/oss/jvm/alpha/driver.log")
        );
        assert_ne!(store.project_dir(&a), store.project_dir(&b));
    }

    #[test]
    fn test_write_log_and_result() {
        let dir = tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        let id = ProjectId::new("oss", "jvm", "alpha").unwrap();
        store.prepare(&id).unwrap();

        let (log_path, digest) = store.write_log(&id, b"hello\n").unwrap();
        assert_eq!(std::fs::read(&log_path).unwrap(), b"hello\n");
        assert_eq!(
            digest,
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );

        let mut record = JobRecord::new(id.clone());
        record.start().unwrap();
        record.pass(None).unwrap();
        let path = store.write_result(&record).unwrap();
        assert_eq!(path, store.result_path(&id));

        let back = store.read_result(&id).unwrap();
        assert_eq!(back.status, JobStatus::Passed);
        assert_eq!(back.project_id, id);
    }
}
