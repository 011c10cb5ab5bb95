use tracing_subscriber::EnvFilter;

/// Initialize structured JSON logging, `info` unless `RUST_LOG` says otherwise.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();
}

/// Register descriptions for the queue's metrics with the installed recorder.
pub fn describe_metrics() {
    metrics::describe_counter!("queue_jobs_enqueued_total", "Total jobs enqueued");
    metrics::describe_counter!("queue_jobs_completed_total", "Total jobs completed");
    metrics::describe_counter!("queue_jobs_failed_total", "Total jobs that failed");
    metrics::describe_counter!("queue_jobs_retried_total", "Total failed jobs moved back to pending");
    metrics::describe_histogram!(
        "queue_job_duration_seconds",
        "Time spent in the job handler"
    );
    metrics::describe_gauge!(
        "queue_depth",
        "Current number of pending jobs in the queue"
    );
}
