//! Worker loop: claim a job, run the handler, record the outcome.
//!
//! A single [`Worker`] processes one job at a time. Parallelism comes from
//! running several workers ([`WorkerPool`]); correctness under that
//! concurrency rests entirely on the store's atomic claim.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::models::job::Job;
use crate::services::queue::{JobQueue, QueueError};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Default idle interval between polls of an empty queue.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Processes one claimed job.
///
/// Returning `Err` marks the job failed with the error's `Display` text.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &Job) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, job: &Job) -> Result<(), HandlerError> {
        (self)(job.clone()).await
    }
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub worker_id: String,
    pub poll_interval: Duration,
    /// Only claim jobs of this type.
    pub job_type: Option<String>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            worker_id: "worker-0".to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            job_type: None,
        }
    }
}

/// How a claimed job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(String),
}

pub struct Worker {
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    options: WorkerOptions,
}

impl Worker {
    pub fn new(queue: Arc<JobQueue>, handler: Arc<dyn JobHandler>, options: WorkerOptions) -> Self {
        Self {
            queue,
            handler,
            options,
        }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Cancellation is observed before each claim and during the idle wait.
    /// A job already handed to the handler runs to completion.
    pub async fn run(self, shutdown: CancellationToken) {
        let worker_id = self.options.worker_id.as_str();
        tracing::info!(
            worker_id = %worker_id,
            job_type = ?self.options.job_type,
            poll_interval_ms = self.options.poll_interval.as_millis() as u64,
            "Job worker started"
        );

        while !shutdown.is_cancelled() {
            match self.process_next_job().await {
                Ok(Some(_)) => {
                    // Job processed, check for the next one immediately
                }
                Ok(None) => {
                    tracing::trace!(worker_id = %worker_id, "No jobs available, sleeping");
                    self.idle(&shutdown).await;
                }
                Err(e) => {
                    tracing::error!(worker_id = %worker_id, error = %e, "Failed to dequeue job, will retry");
                    self.idle(&shutdown).await;
                }
            }
        }

        tracing::info!(worker_id = %worker_id, "Job worker stopped");
    }

    /// Wait for the poll interval, a wake-up from an in-process producer, or shutdown.
    async fn idle(&self, shutdown: &CancellationToken) {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = self.queue.job_ready() => {}
            _ = sleep(self.options.poll_interval) => {}
        }
    }

    /// Claim and process a single job.
    ///
    /// Returns `Ok(None)` when nothing is pending and `Err` only when the claim
    /// itself failed. Failures to record the outcome are logged, not returned:
    /// the job has already run.
    pub async fn process_next_job(&self) -> Result<Option<(Job, JobOutcome)>, QueueError> {
        let claimed = match &self.options.job_type {
            Some(job_type) => self.queue.dequeue_by_type(job_type).await,
            None => self.queue.dequeue().await,
        };

        let job = match claimed {
            Ok(job) => job,
            Err(e) if e.is_no_jobs() => return Ok(None),
            Err(e) => return Err(e),
        };

        let worker_id = self.options.worker_id.as_str();
        tracing::debug!(
            worker_id = %worker_id,
            job_id = %job.id,
            job_type = %job.job_type,
            "Processing job"
        );

        let start = Instant::now();
        let outcome = self.execute(&job).await;
        metrics::histogram!("queue_job_duration_seconds", "job_type" => job.job_type.clone())
            .record(start.elapsed().as_secs_f64());

        match &outcome {
            JobOutcome::Completed => {
                if let Err(e) = self.queue.complete(&job.id).await {
                    tracing::error!(worker_id = %worker_id, job_id = %job.id, error = %e, "Failed to mark job as complete");
                } else {
                    tracing::info!(
                        worker_id = %worker_id,
                        job_id = %job.id,
                        job_type = %job.job_type,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Job completed"
                    );
                }
            }
            JobOutcome::Failed(message) => {
                if let Err(e) = self.queue.fail(&job.id, message).await {
                    tracing::error!(worker_id = %worker_id, job_id = %job.id, error = %e, "Failed to mark job as failed");
                }
                tracing::warn!(
                    worker_id = %worker_id,
                    job_id = %job.id,
                    job_type = %job.job_type,
                    error = %message,
                    "Job failed"
                );
            }
        }

        Ok(Some((job, outcome)))
    }

    /// Run the handler on its own task so a panic is contained and recorded.
    async fn execute(&self, job: &Job) -> JobOutcome {
        let handler = self.handler.clone();
        let owned = job.clone();
        let task = tokio::spawn(async move { handler.handle(&owned).await });

        match task.await {
            Ok(Ok(())) => JobOutcome::Completed,
            Ok(Err(e)) => JobOutcome::Failed(e.to_string()),
            Err(join_err) if join_err.is_panic() => {
                JobOutcome::Failed(format!("handler panicked: {}", panic_message(join_err)))
            }
            Err(join_err) => JobOutcome::Failed(format!("handler aborted: {join_err}")),
        }
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Pool of workers that process jobs concurrently
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Spawn `worker_count` workers named `worker-0`, `worker-1`, ...
    ///
    /// `options.worker_id` is replaced per worker; the rest is shared.
    pub fn new(
        queue: Arc<JobQueue>,
        handler: Arc<dyn JobHandler>,
        worker_count: usize,
        options: WorkerOptions,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let mut workers = Vec::with_capacity(worker_count);

        for i in 0..worker_count {
            let worker = Worker::new(
                queue.clone(),
                handler.clone(),
                WorkerOptions {
                    worker_id: format!("worker-{i}"),
                    ..options.clone()
                },
            );
            workers.push(tokio::spawn(worker.run(shutdown.child_token())));
        }

        Self { workers, shutdown }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Stop all workers and wait for in-flight jobs to finish.
    pub async fn shutdown(self) {
        tracing::info!(workers = self.workers.len(), "Shutting down worker pool");
        self.shutdown.cancel();

        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Worker task ended abnormally");
            }
        }

        tracing::info!("Worker pool shut down");
    }
}
