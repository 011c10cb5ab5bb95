use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::job::{Job, JobStatus};
use crate::services::store::{JobStore, StoreError};

const JOB_COLUMNS: &str = "id, type, payload, status, error, created_at, processed_at";

/// SQLite-backed job store.
///
/// Owns the pool it is given; [`JobStore::close`] closes it.
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Claim the oldest pending row matching `job_type` (any type when `None`).
    ///
    /// The subquery and the update run as one statement, which SQLite executes
    /// under the database write lock, so concurrent claims serialize.
    async fn claim(&self, job_type: Option<&str>) -> Result<Job, StoreError> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'processing'
            WHERE status = 'pending'
              AND id = (
                SELECT id FROM jobs
                WHERE status = 'pending' AND (?1 IS NULL OR type = ?1)
                ORDER BY created_at ASC, rowid ASC
                LIMIT 1
              )
            RETURNING {JOB_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(job_type)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row_to_job(&row),
            None => Err(StoreError::NoJobs),
        }
    }
}

fn parse_status(s: &str) -> Result<JobStatus, StoreError> {
    s.parse()
        .map_err(|_| StoreError::Corrupt(format!("unknown job status: {s}")))
}

fn row_to_job(row: &SqliteRow) -> Result<Job, StoreError> {
    let status: String = row.try_get("status")?;

    Ok(Job {
        id: row.try_get("id")?,
        job_type: row.try_get("type")?,
        payload: row.try_get::<Option<Vec<u8>>, _>("payload")?.unwrap_or_default(),
        status: parse_status(&status)?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

fn rows_to_jobs(rows: &[SqliteRow]) -> Result<Vec<Job>, StoreError> {
    rows.iter().map(row_to_job).collect()
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, job: &Job) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, type, payload, status, created_at)
            VALUES (?, ?, ?, 'pending', ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(job.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::DuplicateId(job.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_by_id(&self, id: &str) -> Result<Job, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row_to_job(&row),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn get_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ? ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows_to_jobs(&rows)
    }

    async fn get_all(&self) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at ASC, rowid ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows_to_jobs(&rows)
    }

    async fn get_all_paginated(&self, offset: i64, count: i64) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at ASC, rowid ASC LIMIT ? OFFSET ?"
        ))
        .bind(count.max(0))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        rows_to_jobs(&rows)
    }

    async fn get_by_status_paginated(
        &self,
        status: JobStatus,
        offset: i64,
        count: i64,
    ) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE status = ?
            ORDER BY created_at ASC, rowid ASC
            LIMIT ? OFFSET ?
            "#
        ))
        .bind(status.as_str())
        .bind(count.max(0))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        rows_to_jobs(&rows)
    }

    async fn count_all(&self) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn dequeue(&self) -> Result<Job, StoreError> {
        self.claim(None).await
    }

    async fn dequeue_by_type(&self, job_type: &str) -> Result<Job, StoreError> {
        self.claim(Some(job_type)).await
    }

    async fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE jobs SET status = ?, error = ?, processed_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(error)
            .bind(processed_at)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// The conditional update and, on a miss, the status read share one
    /// transaction. The update takes the write lock first, so the status
    /// reported in `InvalidTransition` is the one that blocked the write.
    async fn transition(
        &self,
        id: &str,
        from: JobStatus,
        to: JobStatus,
        error: Option<&str>,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let updated: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE jobs
            SET status = ?, error = ?, processed_at = ?
            WHERE id = ? AND status = ?
            RETURNING id
            "#,
        )
        .bind(to.as_str())
        .bind(error)
        .bind(processed_at)
        .bind(id)
        .bind(from.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        if updated.is_some() {
            tx.commit().await?;
            return Ok(());
        }

        let current: Option<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        tx.rollback().await?;

        match current {
            Some(actual) => Err(StoreError::InvalidTransition {
                id: id.to_string(),
                expected: from,
                actual: parse_status(&actual)?,
            }),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn requeue_processing(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE jobs SET status = 'pending' WHERE status = 'processing'")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
