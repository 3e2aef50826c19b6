// crates/server-jobs/src/lib.rs
//! Job manager for cancellable, long-running work.
//!
//! Provides:
//! - `JobManager` — schedules work, tracks live jobs, broadcasts events
//! - `Job` — identity and terminal status of one scheduled unit of work
//! - `ProgressMonitor` — progress reporting and cooperative cancellation
//! - `JobListener` — observer of `job_added` / `progress_changed` / `job_removed`
//! - `BroadcastListener` — relays events into a tokio broadcast channel

pub mod config;
pub mod error;
pub mod job;
pub mod listener;
pub mod manager;
pub mod monitor;
pub mod types;

pub use config::JobManagerConfig;
pub use error::{BoxError, ConfigError, JobError};
pub use job::Job;
pub use listener::{BroadcastListener, JobListener};
pub use manager::JobManager;
pub use monitor::ProgressMonitor;
pub use types::{JobEvent, JobId, JobSnapshot, Severity, Status};
