use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;

use chassis_queue::{
    app_state::AppState,
    config::AppConfig,
    db::{self, queries::SqliteJobStore},
    models::job::Job,
    routes::{self, metrics::MetricsState},
    services::{
        queue::JobQueue,
        worker::{HandlerError, WorkerOptions, WorkerPool},
    },
    telemetry,
};

/// Handler for jobs processed inside the server process: logs and succeeds.
async fn log_job(job: Job) -> Result<(), HandlerError> {
    tracing::info!(
        job_id = %job.id,
        job_type = %job.job_type,
        payload_bytes = job.payload.len(),
        "Handled job"
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}

#[tokio::main]
async fn main() {
    // Initialize structured logging
    telemetry::init_tracing();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing chassis-queue server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    telemetry::describe_metrics();

    // Open the queue database
    tracing::info!(path = %config.database_path.display(), "Opening SQLite job store");
    let db_pool = db::init_pool(&config.database_path, config.max_connections)
        .await
        .expect("Failed to open database");

    tracing::info!("Running database migrations");
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

    let pool = (config.embedded_workers > 0).then(|| {
        tracing::info!(workers = config.embedded_workers, "Starting embedded workers");
        WorkerPool::new(
            queue.clone(),
            Arc::new(log_job),
            config.embedded_workers,
            WorkerOptions {
                poll_interval: config.poll_interval(),
                job_type: config.job_type.clone(),
                ..WorkerOptions::default()
            },
        )
    });

    let metrics_state = MetricsState {
        handle: prometheus_handle,
        queue: queue.clone(),
    };

    let app = routes::router(AppState::new(queue.clone()))
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(metrics_state),
        );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    if let Some(pool) = pool {
        pool.shutdown().await;
    }
    queue.close().await;
    tracing::info!("Server stopped");
}
