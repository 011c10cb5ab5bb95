//! Persistence contract for the job queue.
//!
//! Every backend (SQLite, in-memory, or a remote service) implements
//! [`JobStore`]. The one operation with a real correctness requirement is the
//! claim: [`JobStore::dequeue`] and [`JobStore::dequeue_by_type`] must select
//! the oldest pending job and mark it `processing` indivisibly, so that no two
//! concurrent callers ever receive the same job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::job::{Job, JobStatus};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job. Fails with [`StoreError::DuplicateId`] on id collision.
    async fn create(&self, job: &Job) -> Result<(), StoreError>;

    async fn get_by_id(&self, id: &str) -> Result<Job, StoreError>;

    /// All jobs with `status`, oldest first.
    async fn get_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError>;

    /// All jobs, oldest first.
    async fn get_all(&self) -> Result<Vec<Job>, StoreError>;

    async fn get_all_paginated(&self, offset: i64, count: i64) -> Result<Vec<Job>, StoreError>;

    async fn get_by_status_paginated(
        &self,
        status: JobStatus,
        offset: i64,
        count: i64,
    ) -> Result<Vec<Job>, StoreError>;

    async fn count_all(&self) -> Result<i64, StoreError>;

    async fn count_by_status(&self, status: JobStatus) -> Result<i64, StoreError>;

    /// Atomically claim the oldest pending job (pending -> processing).
    ///
    /// Fails with [`StoreError::NoJobs`] when nothing is pending.
    async fn dequeue(&self) -> Result<Job, StoreError>;

    /// Same contract as [`JobStore::dequeue`], restricted to one job type.
    async fn dequeue_by_type(&self, job_type: &str) -> Result<Job, StoreError>;

    /// Unconditional status write. Fails with [`StoreError::NotFound`] if the
    /// row does not exist.
    async fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Status write that only applies while the job is in `from`.
    ///
    /// Fails with [`StoreError::NotFound`] for an unknown id and
    /// [`StoreError::InvalidTransition`] when the job is in another state;
    /// in both cases nothing is written.
    async fn transition(
        &self,
        id: &str,
        from: JobStatus,
        to: JobStatus,
        error: Option<&str>,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Move every `processing` job back to `pending`, returning how many moved.
    async fn requeue_processing(&self) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Release the underlying handle. Later calls fail.
    async fn close(&self);
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("no jobs available")]
    NoJobs,

    #[error("duplicate job id: {0}")]
    DuplicateId(String),

    #[error("job {id} is {actual}, expected {expected}")]
    InvalidTransition {
        id: String,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("corrupt job row: {0}")]
    Corrupt(String),

    #[error("store is closed")]
    Closed,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
