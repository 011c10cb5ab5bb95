//! Durable background job queue
//!
//! Jobs are persisted to SQLite, claimed atomically by any number of
//! concurrent workers, and resolved to `completed` or `failed`. Failed jobs
//! can be moved back to `pending` with an explicit retry.
//!
//! The pieces, leaf to root:
//!
//! - [`services::store::JobStore`]: persistence contract, implemented by
//!   [`db::queries::SqliteJobStore`] and [`services::memory::InMemoryJobStore`].
//! - [`services::queue::JobQueue`]: lifecycle operations and listing.
//! - [`services::worker`]: the claim, handle, resolve loop and a worker pool.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
pub mod telemetry;
