//! Worker loop, one job per cycle.
//!
//! Each cycle: pause (jitter) → open store connection → claim → run task →
//! publish artifacts → write final status → release connection.
//!
//! Store failures end the cycle early and are retried on the next one. Task
//! and publish failures are written onto the job row. Nothing short of the
//! shutdown flag stops the loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::claim::{self, ClaimOutcome, ClaimProtocol, Jitter};
use crate::config::{LoopConfig, PublishConfig};
use crate::error::{ExecError, PublishError};
use crate::executor::TaskExecutor;
use crate::publish::{ArtifactPublisher, guess_content_type};
use crate::store::{JobConnection, JobSnapshot, JobStore, JobUpdate};
use crate::worker::backoff::Backoff;

/// Dependencies for the worker.
#[derive(Clone)]
pub struct WorkerDeps {
    pub store: Arc<dyn JobStore>,
    pub executor: Arc<dyn TaskExecutor>,
    pub publisher: Arc<ArtifactPublisher>,
}

/// What a single cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No `wait` job.
    Idle,
    /// Another worker claimed the candidate first.
    Lost { id: u64 },
    /// Job finished with `status = done`.
    Completed { id: u64 },
    /// Job finished with `status = error` and this code.
    Failed { id: u64, code: i64 },
    /// The store could not be reached or a query failed.
    StoreFailure,
}

/// Artifacts published for one job.
#[derive(Debug, Default)]
struct Published {
    links: Vec<String>,
    objects: Vec<String>,
}

/// A single job worker.
pub struct Worker {
    deps: WorkerDeps,
    publish: PublishConfig,
    claim: ClaimProtocol,
    backoff: Backoff,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(deps: WorkerDeps, publish: PublishConfig, run: &LoopConfig) -> Self {
        Self {
            deps,
            publish,
            claim: ClaimProtocol::new(Jitter::new(run.jitter_max)),
            backoff: Backoff::new(run.max_backoff),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the jitter source.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.claim = ClaimProtocol::new(jitter);
        self
    }

    /// Flag that stops `run` before its next cycle.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Run cycles until the shutdown flag is set.
    pub async fn run(&mut self) {
        info!(bucket = %self.publish.bucket, "Worker started");

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("Worker shutting down");
                return;
            }

            match self.run_cycle().await {
                CycleOutcome::StoreFailure => {
                    let delay = self.backoff.on_failure();
                    if !delay.is_zero() {
                        warn!(
                            failures = self.backoff.failures(),
                            delay_secs = delay.as_secs(),
                            "Backing off after store failure"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                _ => self.backoff.on_success(),
            }
        }
    }

    /// One full cycle. The connection is released on every path.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.claim.pause().await;
        debug!("Job search");

        let mut conn = match self.deps.store.connect().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "Job store connection failed, retrying next cycle");
                return CycleOutcome::StoreFailure;
            }
        };

        let outcome = self.claim_and_process(conn.as_mut()).await;

        if let Err(e) = conn.close().await {
            warn!(error = %e, "Failed to close job store connection");
        }
        outcome
    }

    async fn claim_and_process(&self, conn: &mut dyn JobConnection) -> CycleOutcome {
        match claim::try_claim(conn).await {
            Ok(ClaimOutcome::Claimed(job)) => self.process(conn, job).await,
            Ok(ClaimOutcome::Lost { id }) => CycleOutcome::Lost { id },
            Ok(ClaimOutcome::Empty) => CycleOutcome::Idle,
            Err(e) => {
                warn!(error = %e, "Job claim failed, retrying next cycle");
                CycleOutcome::StoreFailure
            }
        }
    }

    /// Execute, publish and finalise a claimed job.
    async fn process(&self, conn: &mut dyn JobConnection, job: JobSnapshot) -> CycleOutcome {
        debug!(
            job_id = job.id,
            command = %job.command,
            task = %job.task,
            priority = %job.priority,
            "Processing job"
        );
        let started = Instant::now();

        let update = match self.deps.executor.execute(&job).await {
            Ok(output) => {
                debug!(
                    job_id = job.id,
                    elapsed_ms = output.elapsed.as_millis() as u64,
                    artifacts = output.artifacts.len(),
                    output = %output.output,
                    "Task succeeded"
                );
                let published = self.publish_artifacts(job.id, &output.artifacts).await;
                if let Some(dir) = &output.workdir {
                    remove_workdir(dir).await;
                }
                let duration = started.elapsed().as_secs_f64();
                match published {
                    Ok(p) => JobUpdate::done(duration, &p.links, &p.objects),
                    Err(e) => {
                        warn!(job_id = job.id, code = e.code(), error = %e, "Publish failed");
                        JobUpdate::failed(duration, e.code(), e.to_string())
                    }
                }
            }
            Err(e) => {
                warn!(job_id = job.id, error = %e, "Task failed");
                JobUpdate::failed(started.elapsed().as_secs_f64(), ExecError::CODE, e.to_string())
            }
        };

        let outcome = match update.error {
            Some(code) => CycleOutcome::Failed { id: job.id, code },
            None => CycleOutcome::Completed { id: job.id },
        };

        match conn.write_status(job.id, &update).await {
            Ok(()) => {
                info!(
                    job_id = job.id,
                    status = %update.status,
                    duration_secs = update.duration,
                    "Job finished"
                );
                outcome
            }
            Err(e) => {
                error!(job_id = job.id, error = %e, "Failed to record job result");
                CycleOutcome::StoreFailure
            }
        }
    }

    /// Publish every artifact; the first failure aborts the rest.
    async fn publish_artifacts(
        &self,
        job_id: u64,
        artifacts: &[PathBuf],
    ) -> Result<Published, PublishError> {
        let mut published = Published::default();

        for path in artifacts {
            let object = object_name(job_id, path);
            let outcome = self
                .deps
                .publisher
                .publish(
                    &self.publish.bucket,
                    &self.publish.location,
                    &object,
                    path,
                    guess_content_type(path),
                )
                .await?;
            published.links.push(outcome.url);
            published.objects.push(object);
        }

        Ok(published)
    }
}

/// Object name for an artifact: `<job id>-<file name>`.
pub fn object_name(job_id: u64, path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    format!("{job_id}-{file_name}")
}

async fn remove_workdir(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        warn!(dir = %dir.display(), error = %e, "Failed to remove job directory");
    }
}
