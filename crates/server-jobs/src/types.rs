// crates/server-jobs/src/types.rs
//! Types for the job system.

use serde::Serialize;

/// Unique identifier for a scheduled job.
pub type JobId = u64;

/// Severity of a terminal job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ok = 0,
    Cancel = 8,
    Error = 4,
}

/// Terminal outcome of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub severity: Severity,
    pub message: String,
}

impl Status {
    /// Successful completion with an empty message.
    pub const OK: Status = Status {
        severity: Severity::Ok,
        message: String::new(),
    };

    /// The work observed cancellation and exited early.
    pub const CANCELED: Status = Status {
        severity: Severity::Cancel,
        message: String::new(),
    };

    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Ok,
            message: message.into(),
        }
    }

    pub fn canceled(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Cancel,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.severity == Severity::Ok
    }

    pub fn is_canceled(&self) -> bool {
        self.severity == Severity::Cancel
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Point-in-time view of a job, safe to hand to other threads or serialize.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub name: String,
    /// Absent while the job is still running.
    pub status: Option<Status>,
    pub percent: f64,
    pub canceled: bool,
    pub timestamp: String,
}

/// Lifecycle or progress event, shaped for relaying to remote clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JobEvent {
    Added { job: JobSnapshot },
    Progress { job: JobSnapshot, percent: f64 },
    Removed { job: JobSnapshot, status: Status },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Added { job }
            | JobEvent::Progress { job, .. }
            | JobEvent::Removed { job, .. } => job.job_id,
        }
    }
}
