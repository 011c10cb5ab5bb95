//! In-memory job store
//!
//! Suitable for tests and single-process deployments that do not need jobs
//! to survive a restart. All state sits behind one mutex, so the
//! scan-and-mark in `dequeue` is as indivisible as the SQLite claim.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use crate::models::job::{Job, JobStatus};
use crate::services::store::{JobStore, StoreError};

#[derive(Default)]
struct State {
    /// Insertion order; doubles as the FIFO tie-break.
    jobs: Vec<Job>,
    index: HashMap<String, usize>,
}

impl State {
    fn find_mut(&mut self, id: &str) -> Result<&mut Job, StoreError> {
        let pos = *self
            .index
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(&mut self.jobs[pos])
    }

    /// Jobs matching `filter`, ordered by `created_at` then insertion.
    fn ordered<'a>(&'a self, filter: impl Fn(&Job) -> bool + 'a) -> Vec<&'a Job> {
        let mut matching: Vec<(usize, &Job)> =
            self.jobs.iter().enumerate().filter(|(_, job)| filter(*job)).collect();
        matching.sort_by_key(|(pos, job)| (job.created_at, *pos));
        matching.into_iter().map(|(_, job)| job).collect()
    }

    fn claim(&mut self, filter: impl Fn(&Job) -> bool) -> Result<Job, StoreError> {
        let pos = self
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| job.status == JobStatus::Pending && filter(*job))
            .min_by_key(|(pos, job)| (job.created_at, *pos))
            .map(|(pos, _)| pos)
            .ok_or(StoreError::NoJobs)?;

        let job = &mut self.jobs[pos];
        job.status = JobStatus::Processing;
        Ok(job.clone())
    }
}

fn window(jobs: Vec<&Job>, offset: i64, count: i64) -> Vec<Job> {
    jobs.into_iter()
        .skip(offset.max(0) as usize)
        .take(count.max(0) as usize)
        .cloned()
        .collect()
}

#[derive(Default)]
pub struct InMemoryJobStore {
    state: Mutex<State>,
    closed: AtomicBool,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock(&self) -> Result<tokio::sync::MutexGuard<'_, State>, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(self.state.lock().await)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: &Job) -> Result<(), StoreError> {
        let mut state = self.lock().await?;
        if state.index.contains_key(&job.id) {
            return Err(StoreError::DuplicateId(job.id.clone()));
        }

        // New rows start clean, as in the SQLite store
        let mut job = job.clone();
        job.status = JobStatus::Pending;
        job.error = None;
        job.processed_at = None;
        let pos = state.jobs.len();
        state.index.insert(job.id.clone(), pos);
        state.jobs.push(job);
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Job, StoreError> {
        let mut state = self.lock().await?;
        let job = state.find_mut(id)?.clone();
        Ok(job)
    }

    async fn get_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        let state = self.lock().await?;
        Ok(state.ordered(move |job| job.status == status).into_iter().cloned().collect())
    }

    async fn get_all(&self) -> Result<Vec<Job>, StoreError> {
        let state = self.lock().await?;
        Ok(state.ordered(|_| true).into_iter().cloned().collect())
    }

    async fn get_all_paginated(&self, offset: i64, count: i64) -> Result<Vec<Job>, StoreError> {
        let state = self.lock().await?;
        Ok(window(state.ordered(|_| true), offset, count))
    }

    async fn get_by_status_paginated(
        &self,
        status: JobStatus,
        offset: i64,
        count: i64,
    ) -> Result<Vec<Job>, StoreError> {
        let state = self.lock().await?;
        Ok(window(state.ordered(move |job| job.status == status), offset, count))
    }

    async fn count_all(&self) -> Result<i64, StoreError> {
        let state = self.lock().await?;
        Ok(state.jobs.len() as i64)
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<i64, StoreError> {
        let state = self.lock().await?;
        Ok(state.jobs.iter().filter(|job| job.status == status).count() as i64)
    }

    async fn dequeue(&self) -> Result<Job, StoreError> {
        let mut state = self.lock().await?;
        state.claim(|_| true)
    }

    async fn dequeue_by_type(&self, job_type: &str) -> Result<Job, StoreError> {
        let mut state = self.lock().await?;
        state.claim(|job| job.job_type == job_type)
    }

    async fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock().await?;
        let job = state.find_mut(id)?;
        job.status = status;
        job.error = error.map(str::to_string);
        job.processed_at = processed_at;
        Ok(())
    }

    async fn transition(
        &self,
        id: &str,
        from: JobStatus,
        to: JobStatus,
        error: Option<&str>,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock().await?;
        let job = state.find_mut(id)?;
        if job.status != from {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                expected: from,
                actual: job.status,
            });
        }
        job.status = to;
        job.error = error.map(str::to_string);
        job.processed_at = processed_at;
        Ok(())
    }

    async fn requeue_processing(&self) -> Result<u64, StoreError> {
        let mut state = self.lock().await?;
        let mut moved = 0;
        for job in state.jobs.iter_mut().filter(|job| job.status == JobStatus::Processing) {
            job.status = JobStatus::Pending;
            moved += 1;
        }
        Ok(moved)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().await.map(|_| ())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
