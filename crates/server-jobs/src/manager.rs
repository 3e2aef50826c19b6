// crates/server-jobs/src/manager.rs
//! Central job manager: registry of live jobs, listener hub and executor.

use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;

use crate::config::JobManagerConfig;
use crate::error::JobError;
use crate::job::Job;
use crate::listener::{panic_message, BroadcastListener, JobListener, ListenerSet};
use crate::monitor::ProgressMonitor;
use crate::types::{JobEvent, JobId, JobSnapshot, Status};

/// State shared between the manager and every job's execution context.
struct Shared {
    jobs: RwLock<HashMap<JobId, Arc<Job>>>,
    listeners: Arc<ListenerSet>,
}

impl Shared {
    fn jobs_read(&self) -> RwLockReadGuard<'_, HashMap<JobId, Arc<Job>>> {
        match self.jobs.read() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("RwLock poisoned reading jobs map: {e}");
                e.into_inner()
            }
        }
    }

    fn jobs_write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, Arc<Job>>> {
        match self.jobs.write() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("RwLock poisoned writing jobs map: {e}");
                e.into_inner()
            }
        }
    }

    /// Record the terminal status, unregister the job, then broadcast
    /// `job_removed`. Runs exactly once per job.
    fn finish(&self, job: &Arc<Job>, status: Status) {
        if !job.finish(status.clone()) {
            tracing::warn!(job_id = job.id(), "Job already finished; ignoring second outcome");
            return;
        }
        self.jobs_write().remove(&job.id());

        tracing::info!(
            job_id = job.id(),
            job_name = job.name(),
            severity = ?status.severity,
            status_message = %status.message,
            "Job finished"
        );
        self.listeners.job_removed(job, &status);
    }
}

/// Central job manager.
///
/// Thread-safe; share it behind an `Arc`. `schedule_job` registers the job
/// and notifies listeners of `job_added` before returning, then runs the
/// work on its own thread. Each job ends with exactly one `job_removed`.
pub struct JobManager {
    config: JobManagerConfig,
    next_id: AtomicU64,
    shared: Arc<Shared>,
    events: BroadcastListener,
}

impl JobManager {
    pub fn new() -> Self {
        Self::with_config(JobManagerConfig::default())
    }

    /// # Panics
    /// If `config.event_capacity` is zero; use [`JobManagerConfig::validate`].
    pub fn with_config(config: JobManagerConfig) -> Self {
        let listeners = Arc::new(ListenerSet::new());
        let events = BroadcastListener::new(config.event_capacity);
        listeners.add(Arc::new(events.clone()));

        Self {
            config,
            next_id: AtomicU64::new(1),
            shared: Arc::new(Shared {
                jobs: RwLock::new(HashMap::new()),
                listeners,
            }),
            events,
        }
    }

    pub fn config(&self) -> &JobManagerConfig {
        &self.config
    }

    /// Schedule blocking work on a dedicated thread.
    ///
    /// Listeners have observed `job_added` by the time this returns. A work
    /// body that returns `Err` or panics ends with an ERROR status.
    pub fn schedule_job<F>(&self, name: impl Into<String>, work: F) -> Arc<Job>
    where
        F: FnOnce(&ProgressMonitor) -> Result<Status, JobError> + Send + 'static,
    {
        let job = self.register(name.into());

        let shared = Arc::clone(&self.shared);
        let task_job = Arc::clone(&job);
        let spawned = std::thread::Builder::new()
            .name(format!("{}-{}", self.config.thread_name_prefix, job.id()))
            .spawn(move || {
                let outcome = catch_unwind(AssertUnwindSafe(|| work(task_job.monitor())));
                let status = match outcome {
                    Ok(result) => status_from_result(result),
                    Err(panic) => Status::error(panic_message(&*panic)),
                };
                shared.finish(&task_job, status);
            });

        if let Err(e) = spawned {
            tracing::error!(job_id = job.id(), error = %e, "Failed to spawn job thread");
            self.shared
                .finish(&job, Status::error(format!("Failed to start job: {e}")));
        }

        job
    }

    /// Schedule async work on the current tokio runtime.
    ///
    /// The closure receives the job handle; progress is reported through
    /// `job.monitor()`. Called outside a runtime, the job is still added
    /// and removed, with an ERROR status.
    pub fn schedule_async_job<F, Fut>(&self, name: impl Into<String>, work: F) -> Arc<Job>
    where
        F: FnOnce(Arc<Job>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Status, JobError>> + Send + 'static,
    {
        let job = self.register(name.into());

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(job_id = job.id(), error = %e, "No tokio runtime for async job");
                self.shared
                    .finish(&job, Status::error(format!("Failed to start job: {e}")));
                return job;
            }
        };

        let guard = FinishGuard {
            shared: Arc::clone(&self.shared),
            job: Arc::clone(&job),
        };
        handle.spawn(async move {
            let work_job = Arc::clone(&guard.job);
            // Inner task so a panic surfaces as a JoinError instead of
            // unwinding through the completion path.
            let status = match tokio::spawn(async move { work(work_job).await }).await {
                Ok(result) => status_from_result(result),
                Err(e) if e.is_panic() => Status::error(panic_message(&*e.into_panic())),
                Err(e) => Status::error(e.to_string()),
            };
            guard.complete(status);
        });

        job
    }

    fn register(&self, name: String) -> Arc<Job> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let job = Job::new(id, name, Arc::clone(&self.shared.listeners));

        self.shared.jobs_write().insert(id, Arc::clone(&job));
        tracing::debug!(job_id = id, job_name = job.name(), "Job scheduled");

        self.shared.listeners.job_added(&job);
        job
    }

    /// Request cooperative cancellation. Returns false if the job is not
    /// (or no longer) registered. Never waits for the job to stop.
    pub fn cancel(&self, job: &Job) -> bool {
        self.cancel_by_id(job.id())
    }

    pub fn cancel_by_id(&self, id: JobId) -> bool {
        let job = self.shared.jobs_read().get(&id).cloned();
        match job {
            Some(job) => {
                if job.monitor().set_canceled() {
                    tracing::debug!(job_id = id, job_name = job.name(), "Job cancellation requested");
                }
                true
            }
            None => {
                tracing::debug!(job_id = id, "Cancel requested for unknown job");
                false
            }
        }
    }

    /// Returns false if the listener was already registered.
    pub fn add_job_listener(&self, listener: Arc<dyn JobListener>) -> bool {
        self.shared.listeners.add(listener)
    }

    /// Returns false if the listener was not registered.
    pub fn remove_job_listener(&self, listener: &Arc<dyn JobListener>) -> bool {
        self.shared.listeners.remove(listener)
    }

    /// Subscribe to every job event (for relaying to remote clients).
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Snapshot of a live job.
    pub fn get_job(&self, id: JobId) -> Option<JobSnapshot> {
        self.shared.jobs_read().get(&id).map(|j| j.snapshot())
    }

    /// All live jobs, ordered by id.
    pub fn active_jobs(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<JobSnapshot> =
            self.shared.jobs_read().values().map(|j| j.snapshot()).collect();
        jobs.sort_by_key(|j| j.job_id);
        jobs
    }

    pub fn job_count(&self) -> usize {
        self.shared.jobs_read().len()
    }
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Finishes an async job even when its task is dropped before completing,
/// e.g. on runtime shutdown.
struct FinishGuard {
    shared: Arc<Shared>,
    job: Arc<Job>,
}

impl FinishGuard {
    fn complete(self, status: Status) {
        self.shared.finish(&self.job, status);
    }
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if self.job.is_running() {
            tracing::warn!(job_id = self.job.id(), "Job task dropped before completion");
            self.shared
                .finish(&self.job, Status::error("job task dropped before completion"));
        }
    }
}

fn status_from_result(result: Result<Status, JobError>) -> Status {
    match result {
        Ok(status) => status,
        Err(e) => Status::error(e.status_message()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    /// Forwards removals into a channel so tests can wait on them.
    struct RemovedTx(std::sync::Mutex<mpsc::Sender<(JobId, Status)>>);

    impl JobListener for RemovedTx {
        fn job_removed(&self, job: &Arc<Job>, status: &Status) {
            let _ = self.0.lock().unwrap().send((job.id(), status.clone()));
        }
    }

    fn manager_with_removals() -> (JobManager, mpsc::Receiver<(JobId, Status)>) {
        let manager = JobManager::new();
        let (tx, rx) = mpsc::channel();
        manager.add_job_listener(Arc::new(RemovedTx(std::sync::Mutex::new(tx))));
        (manager, rx)
    }

    #[test]
    fn test_schedule_and_complete() {
        let (manager, removed) = manager_with_removals();

        let job = manager.schedule_job("test", |monitor| {
            monitor.begin_task("count", 10);
            for _ in 0..10 {
                monitor.worked(1);
            }
            Ok(Status::OK)
        });

        let (id, status) = removed.recv_timeout(WAIT).unwrap();
        assert_eq!(id, job.id());
        assert!(status.is_ok());
        assert_eq!(job.status(), Some(Status::OK));
        assert_eq!(job.monitor().worked_so_far(), 10);
        assert!(manager.get_job(job.id()).is_none());
    }

    #[test]
    fn test_error_uses_wrapping_message() {
        let (manager, removed) = manager_with_removals();

        manager.schedule_job("test", |_monitor| {
            Err(JobError::wrap("Something Broke", JobError::msg("Something Broke nested")))
        });

        let (_, status) = removed.recv_timeout(WAIT).unwrap();
        assert!(status.is_error());
        assert_eq!(status.message, "Something Broke");
    }

    #[test]
    fn test_panic_becomes_error_status() {
        let (manager, removed) = manager_with_removals();

        manager.schedule_job("test", |_monitor| -> Result<Status, JobError> {
            panic!("unexpected failure");
        });

        let (_, status) = removed.recv_timeout(WAIT).unwrap();
        assert!(status.is_error());
        assert_eq!(status.message, "unexpected failure");
        assert_eq!(manager.job_count(), 0);
    }

    #[test]
    fn test_active_jobs_and_cancel() {
        let (manager, removed) = manager_with_removals();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let job = manager.schedule_job("blocked", move |monitor| {
            let _ = release_rx.recv();
            if monitor.is_canceled() {
                return Ok(Status::CANCELED);
            }
            Ok(Status::OK)
        });

        let active = manager.active_jobs();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "blocked");
        assert!(active[0].status.is_none());

        assert!(manager.cancel(&job));
        assert!(manager.get_job(job.id()).unwrap().canceled);
        release_tx.send(()).unwrap();

        let (_, status) = removed.recv_timeout(WAIT).unwrap();
        assert!(status.is_canceled());
        assert!(!manager.cancel(&job));
        assert!(manager.active_jobs().is_empty());
    }

    #[test]
    fn test_cancel_unknown_id() {
        let manager = JobManager::new();
        assert!(!manager.cancel_by_id(404));
    }

    #[test]
    fn test_worker_thread_is_named() {
        let (manager, removed) = manager_with_removals();
        let (name_tx, name_rx) = mpsc::channel();

        let job = manager.schedule_job("named", move |_monitor| {
            let _ = name_tx.send(std::thread::current().name().map(str::to_string));
            Ok(Status::OK)
        });

        let name = name_rx.recv_timeout(WAIT).unwrap();
        assert_eq!(name, Some(format!("rsp-job-{}", job.id())));
        removed.recv_timeout(WAIT).unwrap();
    }

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let (manager, removed) = manager_with_removals();
        let a = manager.schedule_job("same", |_| Ok(Status::OK));
        let b = manager.schedule_job("same", |_| Ok(Status::OK));
        assert!(b.id() > a.id());
        assert_ne!(a, b);
        removed.recv_timeout(WAIT).unwrap();
        removed.recv_timeout(WAIT).unwrap();
    }

    #[tokio::test]
    async fn test_async_job_completes() {
        let manager = JobManager::new();
        let mut rx = manager.subscribe();

        let job = manager.schedule_async_job("async", |job| async move {
            job.monitor().begin_task("fetch", 2);
            tokio::time::sleep(Duration::from_millis(10)).await;
            job.monitor().worked(2);
            Ok(Status::ok("fetched"))
        });

        let mut saw_progress = false;
        loop {
            let event = tokio::time::timeout(WAIT, rx.recv())
                .await
                .expect("timeout waiting for event")
                .expect("channel error");
            assert_eq!(event.job_id(), job.id());
            match event {
                JobEvent::Added { .. } => {}
                JobEvent::Progress { percent, .. } => {
                    assert_eq!(percent, 100.0);
                    saw_progress = true;
                }
                JobEvent::Removed { status, .. } => {
                    assert_eq!(status, Status::ok("fetched"));
                    break;
                }
            }
        }
        assert!(saw_progress);
    }

    #[tokio::test]
    async fn test_async_job_panic_becomes_error() {
        let manager = JobManager::new();
        let mut rx = manager.subscribe();

        manager.schedule_async_job("async", |_job| async move {
            if true {
                panic!("async boom");
            }
            Ok(Status::OK)
        });

        loop {
            let event = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
            if let JobEvent::Removed { status, .. } = event {
                assert!(status.is_error());
                assert_eq!(status.message, "async boom");
                break;
            }
        }
    }

    #[test]
    fn test_async_job_without_runtime_still_removed() {
        let (manager, removed) = manager_with_removals();
        let job = manager.schedule_async_job("orphan", |_job| async { Ok(Status::OK) });

        let (id, status) = removed.recv_timeout(WAIT).unwrap();
        assert_eq!(id, job.id());
        assert!(status.is_error());
        assert_eq!(manager.job_count(), 0);
    }

    #[test]
    fn test_async_job_finished_when_runtime_dropped() {
        let (manager, removed) = manager_with_removals();
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        let job = {
            let _enter = rt.enter();
            manager.schedule_async_job("pending", |_job| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Status::OK)
            })
        };
        assert_eq!(manager.job_count(), 1);

        drop(rt);

        let (id, status) = removed.recv_timeout(WAIT).unwrap();
        assert_eq!(id, job.id());
        assert!(status.is_error());
        assert_eq!(status.message, "job task dropped before completion");
        assert_eq!(job.status(), Some(status));
        assert_eq!(manager.job_count(), 0);
        assert!(removed.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_default_and_config() {
        let manager = JobManager::default();
        assert!(manager.active_jobs().is_empty());
        assert_eq!(manager.config(), &JobManagerConfig::default());
    }
}
