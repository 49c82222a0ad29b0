//! Engine configuration loaded from `<store>/coursewalk.toml`.
//!
//! A missing file is not an error: every field has a default, and most
//! deployments run on the defaults. A present-but-malformed file is a
//! configuration error so operators notice typos instead of silently
//! falling back.

use serde::Deserialize;
use std::fs;

use crate::core::error::CoursewalkError;
use crate::core::schemas;
use crate::core::store::Store;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// How many times a failed commit is attempted before the navigation
    /// request is surfaced as failed.
    pub commit_retry_attempts: u32,
    /// Base backoff between commit retries; attempt N sleeps N * this.
    pub commit_backoff_ms: u64,
    /// File name of the LRS event log inside the store root.
    pub lrs_log_file: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            commit_retry_attempts: 3,
            commit_backoff_ms: 25,
            lrs_log_file: schemas::LRS_EVENTS_NAME.to_string(),
        }
    }
}

pub fn load_config(store: &Store) -> Result<EngineConfig, CoursewalkError> {
    let path = store.config_path();
    if !path.exists() {
        return Ok(EngineConfig::default());
    }
    let content = fs::read_to_string(&path)?;
    toml::from_str(&content).map_err(|e| CoursewalkError::Config(e.to_string()))
}
