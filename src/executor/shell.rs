//! Shell executor: runs a job's command in its own output directory.
//!
//! Provides:
//! - A fresh `<work_dir>/job-<id>` directory as the working directory
//! - `JOB_ID`, `JOB_TASK` and `JOB_OUTPUT_DIR` in the environment
//! - Timeout enforcement
//! - Output capture and truncation
//!
//! Every regular file left in the directory is an artifact.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::ExecutorConfig;
use crate::error::ExecError;
use crate::executor::{TaskExecutor, TaskOutput};
use crate::store::JobSnapshot;

/// Maximum output size kept for logs and error descriptions (64KB).
const MAX_OUTPUT_SIZE: usize = 64 * 1024;

/// Shell command executor.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    work_dir: PathBuf,
    timeout: Duration,
}

impl ShellExecutor {
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            timeout: config.timeout,
        }
    }

    /// Set the command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Output directory for a job.
    pub fn job_dir(&self, job_id: u64) -> PathBuf {
        self.work_dir.join(format!("job-{job_id}"))
    }

    /// Recreate an empty output directory.
    async fn prepare_dir(&self, dir: &Path) -> Result<(), ExecError> {
        if tokio::fs::try_exists(dir).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(dir)
                .await
                .map_err(ExecError::Workdir)?;
        }
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(ExecError::Workdir)
    }

    /// Run `cmd` through `sh -c`, capturing stdout and stderr.
    async fn run(&self, cmd: &str, job: &JobSnapshot, dir: &Path) -> Result<(String, i32), ExecError> {
        let mut command = Command::new("sh");
        command
            .args(["-c", cmd])
            .current_dir(dir)
            .env("JOB_ID", job.id.to_string())
            .env("JOB_TASK", &job.task)
            .env("JOB_OUTPUT_DIR", dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(ExecError::Spawn)?;
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let result = tokio::time::timeout(self.timeout, async {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let read_out = async {
                if let Some(out) = stdout_pipe.as_mut() {
                    let _ = out.read_to_end(&mut stdout).await;
                }
            };
            let read_err = async {
                if let Some(err) = stderr_pipe.as_mut() {
                    let _ = err.read_to_end(&mut stderr).await;
                }
            };
            tokio::join!(read_out, read_err);
            let status = child.wait().await?;

            let stdout = String::from_utf8_lossy(&stdout).to_string();
            let stderr = String::from_utf8_lossy(&stderr).to_string();
            let output = if stderr.is_empty() {
                stdout
            } else if stdout.is_empty() {
                stderr
            } else {
                format!("{}\n\n--- stderr ---\n{}", stdout, stderr)
            };

            Ok::<_, std::io::Error>((output, status.code().unwrap_or(-1)))
        })
        .await;

        match result {
            Ok(Ok((output, code))) => Ok((truncate_output(&output), code)),
            Ok(Err(e)) => Err(ExecError::Spawn(e)),
            Err(_) => Err(ExecError::Timeout(self.timeout)),
        }
    }

    /// Run the command and collect what it left behind.
    async fn run_in_dir(
        &self,
        cmd: &str,
        job: &JobSnapshot,
        dir: &Path,
    ) -> Result<(String, Vec<PathBuf>), ExecError> {
        let (output, code) = self.run(cmd, job, dir).await?;
        if code != 0 {
            return Err(ExecError::NonZeroExit { code, output });
        }
        let artifacts = collect_artifacts(dir).await?;
        Ok((output, artifacts))
    }
}

/// Regular files directly inside `dir`, sorted by name.
async fn collect_artifacts(dir: &Path) -> Result<Vec<PathBuf>, ExecError> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(ExecError::Collect)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(ExecError::Collect)? {
        let file_type = entry.file_type().await.map_err(ExecError::Collect)?;
        if file_type.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Truncate output to the maximum size, respecting char boundaries.
fn truncate_output(s: &str) -> String {
    if s.len() <= MAX_OUTPUT_SIZE {
        return s.to_string();
    }
    let half = MAX_OUTPUT_SIZE / 2;
    let head_end = floor_char_boundary(s, half);
    let tail_start = floor_char_boundary(s, s.len() - half);
    format!(
        "{}\n\n... [truncated {} bytes] ...\n\n{}",
        &s[..head_end],
        tail_start - head_end,
        &s[tail_start..]
    )
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Remove a job directory, logging failures.
async fn discard_dir(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(dir = %dir.display(), error = %e, "Failed to remove job directory");
        }
    }
}

#[async_trait]
impl TaskExecutor for ShellExecutor {
    /// On success the directory is handed to the caller through
    /// `TaskOutput::workdir`; on failure it is removed here.
    async fn execute(&self, job: &JobSnapshot) -> Result<TaskOutput, ExecError> {
        let cmd = job.run_text().ok_or(ExecError::EmptyCommand)?;
        let dir = self.job_dir(job.id);

        info!(job_id = job.id, dir = %dir.display(), "Running task");
        let start = Instant::now();
        let result = async {
            self.prepare_dir(&dir).await?;
            self.run_in_dir(cmd, job, &dir).await
        }
        .await;

        match result {
            Ok((output, artifacts)) => {
                debug!(job_id = job.id, artifacts = artifacts.len(), "Task finished");
                Ok(TaskOutput {
                    artifacts,
                    output,
                    workdir: Some(dir),
                    elapsed: start.elapsed(),
                })
            }
            Err(e) => {
                discard_dir(&dir).await;
                Err(e)
            }
        }
    }
}
