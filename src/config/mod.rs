use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Unused by the worker process.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// SQLite database file holding the `jobs` table
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Connection pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Workers spawned by the standalone worker process
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Workers spawned inside the HTTP server process (0 = none)
    #[serde(default)]
    pub embedded_workers: usize,

    /// Idle interval between polls of an empty queue, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Restrict workers to a single job type
    #[serde(default)]
    pub job_type: Option<String>,

    /// Re-queue jobs left in `processing` before starting workers.
    /// Only safe when no other process is working the same database.
    #[serde(default)]
    pub recover_on_start: bool,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./data/queue.db")
}

fn default_max_connections() -> u32 {
    8
}

fn default_worker_count() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
