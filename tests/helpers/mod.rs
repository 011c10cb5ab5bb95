//! Shared setup for tests that run against a real SQLite file

#![allow(dead_code)]

use chassis_queue::{
    db::{self, queries::SqliteJobStore},
    services::queue::JobQueue,
};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::time::sleep;

/// A migrated database in a temporary directory, removed on drop.
pub struct TestDb {
    pub dir: TempDir,
    pub pool: SqlitePool,
}

impl TestDb {
    pub fn path(&self) -> PathBuf {
        self.dir.path().join("queue.db")
    }

    pub fn store(&self) -> SqliteJobStore {
        SqliteJobStore::new(self.pool.clone())
    }

    pub fn queue(&self) -> Arc<JobQueue> {
        Arc::new(JobQueue::new(Arc::new(self.store())))
    }
}

pub async fn open_pool(path: &Path) -> SqlitePool {
    let pool = db::init_pool(path, 8)
        .await
        .expect("Failed to open test database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

pub async fn setup_db() -> TestDb {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let pool = open_pool(&dir.path().join("queue.db")).await;
    TestDb { dir, pool }
}

/// Poll `check` every 10ms until it holds, failing after `timeout`.
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while !check().await {
        assert!(Instant::now() < deadline, "condition not reached within {:?}", timeout);
        sleep(Duration::from_millis(10)).await;
    }
}
