// crates/server-jobs/src/error.rs
use std::error::Error as StdError;
use thiserror::Error;

/// Boxed underlying cause of a job failure.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Failure raised by a job's work body.
///
/// Carries an optional human-facing message alongside the lower-level cause.
/// When present, that message is what surfaces as the job's ERROR status;
/// otherwise the cause's own message is used.
#[derive(Debug, Error)]
#[error("{}", display_message(.message, .source))]
pub struct JobError {
    message: Option<String>,
    #[source]
    source: BoxError,
}

fn display_message(message: &Option<String>, source: &BoxError) -> String {
    match message {
        Some(m) => m.clone(),
        None => source.to_string(),
    }
}

impl JobError {
    /// Relay `cause` with an explicit message that takes precedence over it.
    pub fn wrap(message: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self {
            message: Some(message.into()),
            source: cause.into(),
        }
    }

    /// Relay `cause` as-is; its own message is reported.
    pub fn new(cause: impl Into<BoxError>) -> Self {
        Self {
            message: None,
            source: cause.into(),
        }
    }

    /// Failure described only by text.
    pub fn msg(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::new(message)
    }

    /// Explicit message supplied when the cause was wrapped, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.source.as_ref()
    }

    /// Message to surface as the job's terminal status.
    pub fn status_message(&self) -> String {
        display_message(&self.message, &self.source)
    }
}

impl From<std::io::Error> for JobError {
    fn from(e: std::io::Error) -> Self {
        Self::new(e)
    }
}

/// Errors that can occur when loading job manager configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}
