// crates/server-jobs/src/config.rs
//! Job manager configuration.

use serde::Deserialize;

use crate::error::ConfigError;

const ENV_THREAD_PREFIX: &str = "RSP_JOBS_THREAD_PREFIX";
const ENV_EVENT_CAPACITY: &str = "RSP_JOBS_EVENT_CAPACITY";

pub const DEFAULT_THREAD_PREFIX: &str = "rsp-job";
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JobManagerConfig {
    /// Worker threads are named `{prefix}-{job_id}`.
    pub thread_name_prefix: String,
    /// Capacity of the manager's event relay channel.
    pub event_capacity: usize,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: DEFAULT_THREAD_PREFIX.to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl JobManagerConfig {
    /// Load overrides from `RSP_JOBS_THREAD_PREFIX` / `RSP_JOBS_EVENT_CAPACITY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(prefix) = lookup(ENV_THREAD_PREFIX).filter(|p| !p.trim().is_empty()) {
            config.thread_name_prefix = prefix;
        }

        if let Some(raw) = lookup(ENV_EVENT_CAPACITY) {
            config.event_capacity =
                raw.trim()
                    .parse()
                    .map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
                        key: ENV_EVENT_CAPACITY,
                        value: raw.clone(),
                        reason: e.to_string(),
                    })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: ENV_EVENT_CAPACITY,
                value: "0".to_string(),
                reason: "capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
