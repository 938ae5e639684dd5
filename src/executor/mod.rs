//! Task execution: the step between claiming a job and publishing results.
//!
//! The worker only needs the files a job produced and whether it succeeded;
//! how a job runs sits behind `TaskExecutor`.

pub mod shell;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::store::JobSnapshot;

pub use shell::ShellExecutor;

/// What a successful run produced.
#[derive(Debug, Clone, Default)]
pub struct TaskOutput {
    /// Produced files, in publish order.
    pub artifacts: Vec<PathBuf>,
    /// Captured (truncated) output, for logs.
    pub output: String,
    /// Directory to remove once the artifacts are published.
    pub workdir: Option<PathBuf>,
    pub elapsed: Duration,
}

/// Runs a claimed job.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, job: &JobSnapshot) -> Result<TaskOutput, ExecError>;
}
