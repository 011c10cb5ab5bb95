use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::job::{Job, JobStatus};

/// Request body for `POST /api/v1/jobs`.
#[derive(Debug, Deserialize, Validate)]
pub struct EnqueueRequest {
    #[garde(length(min = 1, max = 100))]
    pub job_type: String,

    #[serde(default)]
    #[garde(skip)]
    pub payload: serde_json::Value,
}

/// Query string for `GET /api/v1/jobs`.
#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<JobStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// A job as exposed over HTTP. The payload is rendered as JSON.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobResponse {
    pub id: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        // Payloads written by `JobQueue::enqueue` are always JSON; anything
        // else is surfaced as a string rather than dropped.
        let payload = serde_json::from_slice(&job.payload).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&job.payload).into_owned())
        });

        Self {
            id: job.id,
            job_type: job.job_type,
            payload,
            status: job.status,
            error: job.error,
            created_at: job.created_at,
            processed_at: job.processed_at,
        }
    }
}
