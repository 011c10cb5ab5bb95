use async_trait::async_trait;
use chassis_queue::{
    config::AppConfig,
    db::{self, queries::SqliteJobStore},
    models::job::Job,
    services::{
        queue::JobQueue,
        worker::{HandlerError, JobHandler, WorkerOptions, WorkerPool},
    },
    telemetry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Demo handler: decodes the JSON payload, simulates work, and fails jobs
/// whose payload carries `"fail": true` so the failure path can be exercised.
struct DemoHandler {
    work: Duration,
}

#[async_trait]
impl JobHandler for DemoHandler {
    async fn handle(&self, job: &Job) -> Result<(), HandlerError> {
        let payload: serde_json::Value = job.payload_as()?;
        tracing::debug!(job_id = %job.id, job_type = %job.job_type, "Running job");

        sleep(self.work).await;

        if payload.get("fail").and_then(|v| v.as_bool()).unwrap_or(false) {
            return Err(format!("job {} requested failure", job.job_type).into());
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    // Initialize structured logging
    telemetry::init_tracing();

    tracing::info!("Starting job worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!(path = %config.database_path.display(), "Opening SQLite job store");
    let db_pool = db::init_pool(&config.database_path, config.max_connections)
        .await
        .expect("Failed to open database");

    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let queue = Arc::new(JobQueue::new(Arc::new(SqliteJobStore::new(db_pool))));

    if config.recover_on_start {
        queue
            .recover_processing()
            .await
            .expect("Failed to recover jobs left in processing");
    }

    let handler = Arc::new(DemoHandler {
        work: Duration::from_millis(500),
    });

    tracing::info!(workers = config.worker_count, "Worker ready, starting job processing loop");

    let pool = WorkerPool::new(
        queue.clone(),
        handler,
        config.worker_count,
        WorkerOptions {
            poll_interval: config.poll_interval(),
            job_type: config.job_type.clone(),
            ..WorkerOptions::default()
        },
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }

    pool.shutdown().await;
    queue.close().await;
    tracing::info!("Worker stopped");
}
