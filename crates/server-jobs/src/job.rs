// crates/server-jobs/src/job.rs
//! A single scheduled unit of work.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::listener::ListenerSet;
use crate::monitor::ProgressMonitor;
use crate::types::{JobId, JobSnapshot, Status};

/// Identity and terminal status of one scheduled unit of work.
///
/// Handles compare equal when they refer to the same scheduled job. The
/// name is only a label and need not be unique.
pub struct Job {
    id: JobId,
    name: String,
    monitor: ProgressMonitor,
    status: OnceLock<Status>,
}

impl Job {
    pub(crate) fn new(id: JobId, name: String, listeners: Arc<ListenerSet>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            id,
            name,
            monitor: ProgressMonitor::new(weak.clone(), listeners),
            status: OnceLock::new(),
        })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn monitor(&self) -> &ProgressMonitor {
        &self.monitor
    }

    /// Terminal status; `None` while the job is still running.
    pub fn status(&self) -> Option<Status> {
        self.status.get().cloned()
    }

    pub fn is_running(&self) -> bool {
        self.status.get().is_none()
    }

    pub fn is_canceled(&self) -> bool {
        self.monitor.is_canceled()
    }

    /// Record the terminal status. Only the first call has any effect.
    pub(crate) fn finish(&self, status: Status) -> bool {
        self.status.set(status).is_ok()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id,
            name: self.name.clone(),
            status: self.status(),
            percent: self.monitor.percent(),
            canceled: self.monitor.is_canceled(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Job {}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status.get())
            .field("canceled", &self.monitor.is_canceled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_lifecycle() {
        let job = Job::new(3, "Test1".to_string(), Arc::new(ListenerSet::new()));
        assert_eq!(job.id(), 3);
        assert_eq!(job.name(), "Test1");
        assert!(job.is_running());
        assert_eq!(job.status(), None);

        assert!(job.finish(Status::OK));
        assert!(!job.finish(Status::error("late")));
        assert!(!job.is_running());
        assert_eq!(job.status(), Some(Status::OK));
    }

    #[test]
    fn test_job_equality_is_by_id() {
        let set = Arc::new(ListenerSet::new());
        let a = Job::new(1, "same".to_string(), Arc::clone(&set));
        let b = Job::new(2, "same".to_string(), Arc::clone(&set));
        let a2 = Job::new(1, "other".to_string(), set);
        assert_ne!(a, b);
        assert_eq!(a, a2);
    }

    #[test]
    fn test_snapshot_reflects_monitor() {
        let job = Job::new(9, "snap".to_string(), Arc::new(ListenerSet::new()));
        job.monitor().begin_task("t", 4);
        job.monitor().worked(1);
        job.monitor().set_canceled();

        let snap = job.snapshot();
        assert_eq!(snap.job_id, 9);
        assert_eq!(snap.name, "snap");
        assert_eq!(snap.percent, 25.0);
        assert!(snap.canceled);
        assert!(snap.status.is_none());
        assert!(!snap.timestamp.is_empty());
    }

    #[test]
    fn test_debug_output() {
        let job = Job::new(5, "dbg".to_string(), Arc::new(ListenerSet::new()));
        let out = format!("{job:?}");
        assert!(out.contains("id: 5"));
        assert!(out.contains("dbg"));
    }
}
