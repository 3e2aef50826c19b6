// crates/server-jobs/src/listener.rs
//! Observers of job lifecycle and progress events.
//!
//! Listeners are called synchronously on the thread that produced the event:
//! the scheduling thread for `job_added`, the job's own thread for
//! `progress_changed` and `job_removed`. A slow listener stalls that thread,
//! so implementations should hand heavy work off elsewhere (see
//! [`BroadcastListener`]).

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

use crate::job::Job;
use crate::types::{JobEvent, Status};

/// Receives job lifecycle and progress events.
///
/// Every method has an empty default so observers only implement what they
/// care about.
pub trait JobListener: Send + Sync {
    fn job_added(&self, _job: &Arc<Job>) {}

    fn job_removed(&self, _job: &Arc<Job>, _status: &Status) {}

    /// `percent` is in `[0, 100]`.
    fn progress_changed(&self, _job: &Arc<Job>, _percent: f64) {}
}

/// Ordered set of registered listeners and the broadcast loop over them.
///
/// Broadcasts iterate over a copy of the list taken under the read lock, so
/// listeners may be added or removed concurrently, including from inside a
/// callback.
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn JobListener>>>,
}

impl ListenerSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns false if the listener was already registered.
    pub(crate) fn add(&self, listener: Arc<dyn JobListener>) -> bool {
        let mut listeners = match self.listeners.write() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("RwLock poisoned writing listeners: {e}");
                e.into_inner()
            }
        };
        if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Returns false if the listener was not registered.
    pub(crate) fn remove(&self, listener: &Arc<dyn JobListener>) -> bool {
        let mut listeners = match self.listeners.write() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("RwLock poisoned writing listeners: {e}");
                e.into_inner()
            }
        };
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.snapshot().len()
    }

    fn snapshot(&self) -> Vec<Arc<dyn JobListener>> {
        match self.listeners.read() {
            Ok(guard) => guard.clone(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading listeners: {e}");
                e.into_inner().clone()
            }
        }
    }

    pub(crate) fn job_added(&self, job: &Arc<Job>) {
        self.dispatch("job_added", job, |l| l.job_added(job));
    }

    pub(crate) fn job_removed(&self, job: &Arc<Job>, status: &Status) {
        self.dispatch("job_removed", job, |l| l.job_removed(job, status));
    }

    pub(crate) fn progress_changed(&self, job: &Arc<Job>, percent: f64) {
        self.dispatch("progress_changed", job, |l| l.progress_changed(job, percent));
    }

    fn dispatch(&self, event: &'static str, job: &Job, f: impl Fn(&dyn JobListener)) {
        for listener in self.snapshot() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| f(listener.as_ref()))) {
                tracing::warn!(
                    job_id = job.id(),
                    event,
                    panic = %panic_message(&*panic),
                    "Job listener panicked; continuing with remaining listeners"
                );
            }
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "job panicked".to_string()
    }
}

/// Relays every event into a tokio broadcast channel.
///
/// Sending never blocks; events are dropped when nobody is subscribed and
/// slow receivers observe `RecvError::Lagged`.
#[derive(Clone)]
pub struct BroadcastListener {
    tx: broadcast::Sender<JobEvent>,
}

impl BroadcastListener {
    /// Create a relay with the given channel capacity.
    ///
    /// # Panics
    /// If `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Relay into an existing channel, e.g. one shared with other producers.
    pub fn from_sender(tx: broadcast::Sender<JobEvent>) -> Self {
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    fn send(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

impl JobListener for BroadcastListener {
    fn job_added(&self, job: &Arc<Job>) {
        self.send(JobEvent::Added {
            job: job.snapshot(),
        });
    }

    fn job_removed(&self, job: &Arc<Job>, status: &Status) {
        self.send(JobEvent::Removed {
            job: job.snapshot(),
            status: status.clone(),
        });
    }

    fn progress_changed(&self, job: &Arc<Job>, percent: f64) {
        self.send(JobEvent::Progress {
            job: job.snapshot(),
            percent,
        });
    }
}
