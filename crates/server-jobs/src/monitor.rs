// crates/server-jobs/src/monitor.rs
//! Per-job progress and cancellation state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::job::Job;
use crate::listener::ListenerSet;

#[derive(Debug, Default)]
struct TaskProgress {
    name: String,
    sub_task: Option<String>,
    total: u64,
    worked: u64,
    percent: f64,
}

/// Handed to a job's work body for reporting progress and polling
/// cancellation.
///
/// Every call to [`worked`](Self::worked) or [`done`](Self::done) broadcasts
/// `progress_changed` synchronously on the calling thread. Reports from
/// several threads are serialized, so listeners never see the percentage
/// of one task go backwards. Listeners must not report progress from
/// inside `progress_changed`.
pub struct ProgressMonitor {
    job: Weak<Job>,
    listeners: Arc<ListenerSet>,
    /// Held across compute and broadcast. Taken before `task`, never while
    /// holding it; listeners read `task` through `Job::snapshot`.
    emit: Mutex<()>,
    task: Mutex<TaskProgress>,
    canceled: AtomicBool,
}

impl ProgressMonitor {
    pub(crate) fn new(job: Weak<Job>, listeners: Arc<ListenerSet>) -> Self {
        Self {
            job,
            listeners,
            emit: Mutex::new(()),
            task: Mutex::new(TaskProgress::default()),
            canceled: AtomicBool::new(false),
        }
    }

    /// Start a task of `total_work` units, resetting any previous progress.
    ///
    /// # Panics
    /// If `total_work` is zero.
    pub fn begin_task(&self, name: impl Into<String>, total_work: u64) {
        assert!(total_work > 0, "begin_task requires a positive total_work");
        let mut task = self.lock_task();
        *task = TaskProgress {
            name: name.into(),
            sub_task: None,
            total: total_work,
            worked: 0,
            percent: 0.0,
        };
    }

    /// Record `delta` more units of work and broadcast the new percentage.
    pub fn worked(&self, delta: u64) {
        let _emit = self.lock_emit();
        let percent = {
            let mut task = self.lock_task();
            if task.total == 0 {
                tracing::warn!(
                    job_id = self.job_id(),
                    delta,
                    "worked() called before begin_task(); ignoring"
                );
                return;
            }
            task.worked = task.worked.saturating_add(delta);
            task.percent = percent_of(task.worked, task.total);
            task.percent
        };
        self.broadcast(percent);
    }

    /// Signal completion: always broadcasts exactly 100.
    pub fn done(&self) {
        let _emit = self.lock_emit();
        self.lock_task().percent = 100.0;
        self.broadcast(100.0);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Label the step currently in progress. Does not broadcast.
    pub fn sub_task(&self, name: impl Into<String>) {
        self.lock_task().sub_task = Some(name.into());
    }

    pub fn task_name(&self) -> String {
        self.lock_task().name.clone()
    }

    pub fn sub_task_name(&self) -> Option<String> {
        self.lock_task().sub_task.clone()
    }

    pub fn total_work(&self) -> u64 {
        self.lock_task().total
    }

    pub fn worked_so_far(&self) -> u64 {
        self.lock_task().worked
    }

    /// Last percentage broadcast for this job.
    pub fn percent(&self) -> f64 {
        self.lock_task().percent
    }

    /// Returns true if this call flipped the flag.
    pub(crate) fn set_canceled(&self) -> bool {
        !self.canceled.swap(true, Ordering::SeqCst)
    }

    fn broadcast(&self, percent: f64) {
        if let Some(job) = self.job.upgrade() {
            self.listeners.progress_changed(&job, percent);
        }
    }

    fn job_id(&self) -> Option<u64> {
        self.job.upgrade().map(|j| j.id())
    }

    fn lock_emit(&self) -> MutexGuard<'_, ()> {
        match self.emit.lock() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("Mutex poisoned locking progress emit: {e}");
                e.into_inner()
            }
        }
    }

    fn lock_task(&self) -> MutexGuard<'_, TaskProgress> {
        match self.task.lock() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("Mutex poisoned locking task progress: {e}");
                e.into_inner()
            }
        }
    }
}

/// `worked / total` as a percentage, capped at 100.
fn percent_of(worked: u64, total: u64) -> f64 {
    (worked as f64 * 100.0 / total as f64).min(100.0)
}
