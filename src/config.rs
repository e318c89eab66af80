use std::{path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    retry::{DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_JITTER, RetryPolicy},
};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerConfig {
    /// Period between full re-lists of dockercfg secrets. Unset never resyncs.
    pub resync_seconds: Option<u64>,
    pub max_update_attempts: u32,
    /// Upper bound of the random pause between conflicting updates.
    pub conflict_jitter_millis: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            resync_seconds: None,
            max_update_attempts: DEFAULT_MAX_ATTEMPTS,
            conflict_jitter_millis: DEFAULT_MAX_JITTER.as_millis() as u64,
        }
    }
}

impl ControllerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn resync(&self) -> Result<Option<Duration>, ConfigError> {
        match self.resync_seconds {
            Some(0) => Err(ConfigError::ZeroResync),
            Some(secs) => Ok(Some(Duration::from_secs(secs))),
            None => Ok(None),
        }
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        RetryPolicy::new(
            self.max_update_attempts,
            Duration::from_millis(self.conflict_jitter_millis),
        )
    }
}
