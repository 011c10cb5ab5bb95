use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

use crate::models::job::{Job, JobPage, JobStatus, QueueStats};
use crate::services::store::{JobStore, StoreError};

/// Page size used when a caller passes a non-positive limit.
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Job lifecycle façade over a [`JobStore`].
///
/// Enforces the state machine:
///
/// ```text
/// enqueue -> pending -> (dequeue) processing -> (complete) completed
///                                            -> (fail)     failed -> (retry) pending
/// ```
///
/// `complete`, `fail` and `retry` are compare-and-set writes in the store, so
/// an out-of-order call fails with [`StoreError::InvalidTransition`] and writes
/// nothing.
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    job_ready: Notify,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            job_ready: Notify::new(),
        }
    }

    /// Serialize `payload` and persist it as a new pending job.
    pub async fn enqueue<T>(&self, job_type: &str, payload: &T) -> Result<Job, QueueError>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(payload)?;
        let job = Job::new(job_type, payload);
        self.store.create(&job).await?;

        metrics::counter!("queue_jobs_enqueued_total", "job_type" => job.job_type.clone()).increment(1);
        tracing::debug!(job_id = %job.id, job_type = %job.job_type, "Job enqueued");

        self.wake_workers();
        Ok(job)
    }

    /// Claim the oldest pending job.
    pub async fn dequeue(&self) -> Result<Job, QueueError> {
        Ok(self.store.dequeue().await?)
    }

    /// Claim the oldest pending job of `job_type`.
    pub async fn dequeue_by_type(&self, job_type: &str) -> Result<Job, QueueError> {
        Ok(self.store.dequeue_by_type(job_type).await?)
    }

    /// processing -> completed
    pub async fn complete(&self, job_id: &str) -> Result<(), QueueError> {
        self.store
            .transition(
                job_id,
                JobStatus::Processing,
                JobStatus::Completed,
                None,
                Some(Utc::now()),
            )
            .await?;

        metrics::counter!("queue_jobs_completed_total").increment(1);
        Ok(())
    }

    /// processing -> failed, recording `error` verbatim.
    pub async fn fail(&self, job_id: &str, error: &str) -> Result<(), QueueError> {
        self.store
            .transition(
                job_id,
                JobStatus::Processing,
                JobStatus::Failed,
                Some(error),
                Some(Utc::now()),
            )
            .await?;

        metrics::counter!("queue_jobs_failed_total").increment(1);
        Ok(())
    }

    /// failed -> pending, clearing the error and `processed_at`.
    pub async fn retry(&self, job_id: &str) -> Result<(), QueueError> {
        self.store
            .transition(job_id, JobStatus::Failed, JobStatus::Pending, None, None)
            .await?;

        metrics::counter!("queue_jobs_retried_total").increment(1);
        tracing::info!(job_id = %job_id, "Job re-queued for retry");

        self.wake_workers();
        Ok(())
    }

    /// Put every `processing` job back to `pending`.
    ///
    /// Only safe while no worker is running against the store: a job that is
    /// genuinely in flight would be claimed a second time.
    pub async fn recover_processing(&self) -> Result<u64, QueueError> {
        let moved = self.store.requeue_processing().await?;
        if moved > 0 {
            tracing::warn!(count = moved, "Re-queued jobs left in processing");
            self.wake_workers();
        }
        Ok(moved)
    }

    pub async fn get_by_id(&self, job_id: &str) -> Result<Job, QueueError> {
        Ok(self.store.get_by_id(job_id).await?)
    }

    pub async fn get_all(&self) -> Result<Vec<Job>, QueueError> {
        Ok(self.store.get_all().await?)
    }

    pub async fn get_pending(&self) -> Result<Vec<Job>, QueueError> {
        Ok(self.store.get_by_status(JobStatus::Pending).await?)
    }

    pub async fn get_processing(&self) -> Result<Vec<Job>, QueueError> {
        Ok(self.store.get_by_status(JobStatus::Processing).await?)
    }

    pub async fn get_completed(&self) -> Result<Vec<Job>, QueueError> {
        Ok(self.store.get_by_status(JobStatus::Completed).await?)
    }

    pub async fn get_failed(&self) -> Result<Vec<Job>, QueueError> {
        Ok(self.store.get_by_status(JobStatus::Failed).await?)
    }

    pub async fn get_all_paginated(&self, page: i64, limit: i64) -> Result<JobPage, QueueError> {
        let (page, limit, offset) = normalize_page(page, limit);
        let total = self.store.count_all().await?;
        let items = self.store.get_all_paginated(offset, limit).await?;
        Ok(build_page(items, total, page, limit))
    }

    pub async fn get_by_status_paginated(
        &self,
        status: JobStatus,
        page: i64,
        limit: i64,
    ) -> Result<JobPage, QueueError> {
        let (page, limit, offset) = normalize_page(page, limit);
        let total = self.store.count_by_status(status).await?;
        let items = self.store.get_by_status_paginated(status, offset, limit).await?;
        Ok(build_page(items, total, page, limit))
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut stats = QueueStats::default();
        for status in JobStatus::ALL {
            let count = self.store.count_by_status(status).await?;
            match status {
                JobStatus::Pending => stats.pending = count,
                JobStatus::Processing => stats.processing = count,
                JobStatus::Completed => stats.completed = count,
                JobStatus::Failed => stats.failed = count,
            }
            stats.total += count;
        }

        metrics::gauge!("queue_depth").set(stats.pending as f64);
        Ok(stats)
    }

    /// Check store connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        Ok(self.store.ping().await?)
    }

    /// Resolves when an in-process producer makes a job pending.
    ///
    /// Producers in other processes do not signal; workers keep polling.
    pub fn job_ready(&self) -> Notified<'_> {
        self.job_ready.notified()
    }

    /// Wake every idle worker, so a typed worker is not skipped in favor of
    /// one that cannot claim the new job. With nobody waiting, a single
    /// permit is stored for the next worker to go idle.
    fn wake_workers(&self) {
        self.job_ready.notify_waiters();
        self.job_ready.notify_one();
    }

    /// Close the underlying store handle.
    pub async fn close(&self) {
        self.store.close().await;
    }
}

fn normalize_page(page: i64, limit: i64) -> (i64, i64, i64) {
    let page = page.max(1);
    let limit = if limit < 1 { DEFAULT_PAGE_SIZE } else { limit };
    let offset = (page - 1).saturating_mul(limit);
    (page, limit, offset)
}

fn build_page(items: Vec<Job>, total: i64, page: i64, limit: i64) -> JobPage {
    JobPage {
        items,
        total,
        page,
        limit,
        total_pages: total / limit + i64::from(total % limit != 0),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl QueueError {
    /// Nothing to claim; not a fault.
    pub fn is_no_jobs(&self) -> bool {
        matches!(self, QueueError::Store(StoreError::NoJobs))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, QueueError::Store(StoreError::NotFound(_)))
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, QueueError::Store(StoreError::InvalidTransition { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::InMemoryJobStore;
    use std::collections::HashSet;
    use std::time::Duration;

    fn queue() -> JobQueue {
        JobQueue::new(Arc::new(InMemoryJobStore::new()))
    }

    #[tokio::test]
    async fn test_enqueue_and_dequeue() {
        let queue = queue();
        let job = queue
            .enqueue("send_email", &serde_json::json!({"to": "user@example.com"}))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let claimed = queue.dequeue().await.unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.status, JobStatus::Processing);

        let payload: serde_json::Value = claimed.payload_as().unwrap();
        assert_eq!(payload["to"], "user@example.com");
    }

    #[tokio::test]
    async fn test_dequeue_in_enqueue_order() {
        let queue = queue();
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(queue.enqueue("task", &i).await.unwrap().id);
        }

        for id in ids {
            assert_eq!(queue.dequeue().await.unwrap().id, id);
        }
    }

    #[tokio::test]
    async fn test_dequeue_empty_is_no_jobs() {
        let queue = queue();
        assert!(queue.dequeue().await.unwrap_err().is_no_jobs());

        // Only non-pending jobs left
        let job = queue.enqueue("task", &()).await.unwrap();
        queue.dequeue().await.unwrap();
        queue.complete(&job.id).await.unwrap();
        assert!(queue.dequeue().await.unwrap_err().is_no_jobs());
        assert!(queue.dequeue_by_type("task").await.unwrap_err().is_no_jobs());
    }

    #[tokio::test]
    async fn test_complete_sets_processed_at() {
        let queue = queue();
        let job = queue.enqueue("task", &()).await.unwrap();
        queue.dequeue().await.unwrap();
        queue.complete(&job.id).await.unwrap();

        let done = queue.get_by_id(&job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.processed_at.is_some());
        assert!(done.error.is_none());
    }

    #[tokio::test]
    async fn test_fail_stores_message_verbatim() {
        let queue = queue();
        let job = queue.enqueue("task", &()).await.unwrap();
        queue.dequeue().await.unwrap();
        queue.fail(&job.id, "smtp: connection refused").await.unwrap();

        let failed = queue.get_by_id(&job.id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("smtp: connection refused"));
        assert!(failed.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_retry_round_trip() {
        let queue = queue();
        let job = queue.enqueue("task", &"data").await.unwrap();
        queue.dequeue().await.unwrap();
        queue.fail(&job.id, "boom").await.unwrap();
        queue.retry(&job.id).await.unwrap();

        let retried = queue.get_by_id(&job.id).await.unwrap();
        assert_eq!(retried.status, JobStatus::Pending);
        assert!(retried.error.is_none());
        assert!(retried.processed_at.is_none());
        assert_eq!(retried.payload, job.payload);
        assert_eq!(retried.created_at, job.created_at);

        // Claimable again
        assert_eq!(queue.dequeue().await.unwrap().id, job.id);
    }

    #[tokio::test]
    async fn test_out_of_order_transitions_rejected() {
        let queue = queue();
        let job = queue.enqueue("task", &()).await.unwrap();

        // pending: neither complete, fail nor retry apply
        assert!(queue.complete(&job.id).await.unwrap_err().is_invalid_transition());
        assert!(queue.fail(&job.id, "x").await.unwrap_err().is_invalid_transition());
        assert!(queue.retry(&job.id).await.unwrap_err().is_invalid_transition());

        queue.dequeue().await.unwrap();
        queue.complete(&job.id).await.unwrap();

        // completed is terminal
        assert!(queue.complete(&job.id).await.unwrap_err().is_invalid_transition());
        assert!(queue.retry(&job.id).await.unwrap_err().is_invalid_transition());

        let unchanged = queue.get_by_id(&job.id).await.unwrap();
        assert_eq!(unchanged.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let queue = queue();
        assert!(queue.get_by_id("missing").await.unwrap_err().is_not_found());
        assert!(queue.complete("missing").await.unwrap_err().is_not_found());
        assert!(queue.fail("missing", "x").await.unwrap_err().is_not_found());
        assert!(queue.retry("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_get_all_paginated() {
        let queue = queue();
        for i in 0..15 {
            queue.enqueue(&format!("type{i}"), &()).await.unwrap();
        }

        let mut seen = HashSet::new();
        for page in 1..=3 {
            let result = queue.get_all_paginated(page, 5).await.unwrap();
            assert_eq!(result.items.len(), 5);
            assert_eq!(result.page, page);
            assert_eq!(result.limit, 5);
            assert_eq!(result.total, 15);
            assert_eq!(result.total_pages, 3);
            for job in result.items {
                assert!(seen.insert(job.id));
            }
        }
        assert_eq!(seen.len(), 15);

        let past_end = queue.get_all_paginated(4, 5).await.unwrap();
        assert!(past_end.items.is_empty());
        assert_eq!(past_end.total, 15);
    }

    #[tokio::test]
    async fn test_get_all_paginated_defaults() {
        let queue = queue();
        queue.enqueue("task", &()).await.unwrap();

        let result = queue.get_all_paginated(0, 10).await.unwrap();
        assert_eq!(result.page, 1);
        assert_eq!(result.items.len(), 1);

        let result = queue.get_all_paginated(1, 0).await.unwrap();
        assert_eq!(result.limit, DEFAULT_PAGE_SIZE);
        assert_eq!(result.total_pages, 1);

        let empty = JobQueue::new(Arc::new(InMemoryJobStore::new()));
        let result = empty.get_all_paginated(1, 10).await.unwrap();
        assert_eq!(result.total, 0);
        assert_eq!(result.total_pages, 0);
    }

    #[tokio::test]
    async fn test_pagination_with_max_limit() {
        let queue = queue();
        for _ in 0..3 {
            queue.enqueue("task", &()).await.unwrap();
        }

        let result = queue.get_all_paginated(1, i64::MAX).await.unwrap();
        assert_eq!(result.items.len(), 3);
        assert_eq!(result.limit, i64::MAX);
        assert_eq!(result.total, 3);
        assert_eq!(result.total_pages, 1);

        let beyond = queue.get_all_paginated(2, i64::MAX).await.unwrap();
        assert!(beyond.items.is_empty());
        assert_eq!(beyond.total_pages, 1);

        let pending = queue
            .get_by_status_paginated(JobStatus::Pending, i64::MAX, i64::MAX)
            .await
            .unwrap();
        assert!(pending.items.is_empty());
        assert_eq!(pending.total_pages, 1);
    }

    #[tokio::test]
    async fn test_get_by_status_paginated() {
        let queue = queue();
        for _ in 0..8 {
            queue.enqueue("pending-task", &()).await.unwrap();
        }
        for _ in 0..3 {
            let job = queue.dequeue().await.unwrap();
            queue.complete(&job.id).await.unwrap();
        }

        let pending = queue
            .get_by_status_paginated(JobStatus::Pending, 1, 3)
            .await
            .unwrap();
        assert_eq!(pending.items.len(), 3);
        assert_eq!(pending.total, 5);
        assert_eq!(pending.total_pages, 2);

        let completed = queue
            .get_by_status_paginated(JobStatus::Completed, 1, 10)
            .await
            .unwrap();
        assert_eq!(completed.items.len(), 3);
        assert_eq!(completed.total, 3);
    }

    #[tokio::test]
    async fn test_listing_by_status() {
        let queue = queue();
        let done = queue.enqueue("a", &()).await.unwrap();
        let broken = queue.enqueue("b", &()).await.unwrap();
        let waiting = queue.enqueue("c", &()).await.unwrap();

        queue.dequeue().await.unwrap();
        queue.complete(&done.id).await.unwrap();
        queue.dequeue().await.unwrap();
        queue.fail(&broken.id, "bad input").await.unwrap();

        assert_eq!(queue.get_all().await.unwrap().len(), 3);
        assert_eq!(queue.get_pending().await.unwrap()[0].id, waiting.id);
        assert_eq!(queue.get_completed().await.unwrap()[0].id, done.id);
        assert_eq!(queue.get_failed().await.unwrap()[0].id, broken.id);
        assert!(queue.get_processing().await.unwrap().is_empty());

        let stats = queue.stats().await.unwrap();
        assert_eq!(
            stats,
            QueueStats {
                pending: 1,
                processing: 0,
                completed: 1,
                failed: 1,
                total: 3,
            }
        );
    }

    #[tokio::test]
    async fn test_recover_processing() {
        let queue = queue();
        let job = queue.enqueue("task", &()).await.unwrap();
        queue.dequeue().await.unwrap();

        assert_eq!(queue.recover_processing().await.unwrap(), 1);
        assert_eq!(queue.get_by_id(&job.id).await.unwrap().status, JobStatus::Pending);
        assert_eq!(queue.recover_processing().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_wakes_waiter() {
        let queue = Arc::new(queue());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.job_ready().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue("task", &()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter was not woken")
            .unwrap();
    }

    #[tokio::test]
    async fn test_enqueue_wakes_every_waiter() {
        let queue = Arc::new(queue());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.job_ready().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue("task", &()).await.unwrap();

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter was not woken")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_enqueue_without_waiters_leaves_permit() {
        let queue = queue();
        queue.enqueue("task", &()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), queue.job_ready())
            .await
            .expect("permit was not stored");
    }
}
