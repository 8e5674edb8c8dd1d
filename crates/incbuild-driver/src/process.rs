//! Driver that runs each project through an external program.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use incbuild_core::{DriverFlags, DriverOutput, IncbuildError, Project, ProjectDriver, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Output shared by the stdout and stderr readers, in arrival order.
type SharedLog = Arc<Mutex<Vec<u8>>>;

/// Runs `<program> [args..] <project-id> <artifact-root> [--rts <tool>] [--incremental]`
/// in the project's directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDriver {
    pub program: PathBuf,
    /// Fixed arguments placed before the per-project ones.
    pub args: Vec<String>,
    /// 0 = no timeout.
    pub timeout_secs: u64,
}

impl ProcessDriver {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout_secs: 0,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Full argument list for one project.
    pub fn command_args(&self, project: &Project, flags: &DriverFlags) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(project.id.to_string());
        args.push(flags.artifact_root.display().to_string());
        if let Some(tool) = flags.rts.tool() {
            args.push("--rts".to_string());
            args.push(tool.to_string());
        }
        if flags.incremental {
            args.push("--incremental".to_string());
        }
        args
    }

    /// Extra environment for one project.
    pub fn command_env(flags: &DriverFlags) -> Vec<(&'static str, String)> {
        match flags.rts.tool() {
            Some(tool) => vec![("RTS_ON", "1".to_string()), ("RTS_TOOL", tool.to_string())],
            None => Vec::new(),
        }
    }

    fn failure(&self, project: &Project, reason: String, log: Vec<u8>) -> IncbuildError {
        IncbuildError::DriverFailure {
            project: project.id.to_string(),
            reason,
            log,
        }
    }
}

#[async_trait]
impl ProjectDriver for ProcessDriver {
    async fn run(&self, project: &Project, flags: &DriverFlags) -> Result<DriverOutput> {
        let start = Instant::now();
        let args = self.command_args(project, flags);

        let mut child = Command::new(&self.program)
            .args(&args)
            .envs(Self::command_env(flags))
            .current_dir(&project.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                self.failure(
                    project,
                    format!("cannot start {:?}: {}", self.program, e),
                    Vec::new(),
                )
            })?;

        let log: SharedLog = Arc::default();
        let readers = [
            capture(child.stdout.take(), Arc::clone(&log)),
            capture(child.stderr.take(), Arc::clone(&log)),
        ];

        let status = if self.timeout_secs > 0 {
            let waited =
                tokio::time::timeout(Duration::from_secs(self.timeout_secs), child.wait()).await;
            match waited {
                Ok(status) => status?,
                Err(_) => {
                    if let Err(e) = child.kill().await {
                        warn!(project = %project.id, error = %e, "failed to kill timed-out driver");
                    }
                    // Grandchildren may still hold the pipes open.
                    for reader in &readers {
                        reader.abort();
                    }
                    let partial = std::mem::take(&mut *log.lock().await);
                    return Err(self.failure(
                        project,
                        format!("timed out after {} seconds", self.timeout_secs),
                        partial,
                    ));
                }
            }
        } else {
            child.wait().await?
        };

        for reader in readers {
            match reader.await {
                Ok(result) => result?,
                Err(e) => warn!(project = %project.id, error = %e, "driver output reader failed"),
            }
        }

        // Killed by a signal: no exit code.
        let exit_code = status.code().unwrap_or(-1);
        let log = std::mem::take(&mut *log.lock().await);

        debug!(
            project = %project.id,
            exit_code = exit_code,
            duration_ms = start.elapsed().as_millis() as u64,
            log_bytes = log.len(),
            "driver finished"
        );

        Ok(DriverOutput::new(exit_code, log))
    }
}

/// Copy one output stream into the shared log until it closes.
fn capture<R>(stream: Option<R>, log: SharedLog) -> JoinHandle<std::io::Result<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut stream) = stream else {
            return Ok(());
        };
        let mut buf = [0u8; 8192];
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            log.lock().await.extend_from_slice(&buf[..n]);
        }
    })
}
