//! Client settings loaded from YAML.
//!
//! ```yaml
//! address: 127.0.0.1:7711
//! capabilities:
//!   nack: enqueue
//!   counters: false
//! pool:
//!   max_active: 16
//!   idle_timeout: 300000
//! defaults:
//!   timeout: 1000
//!   retry_after: 60000
//! poll_interval: 10
//! ```
//!
//! All durations are in milliseconds.
use std::path::Path;
use std::time::Duration;
use std::{fs, io};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::DEFAULT_POLL_INTERVAL;
use crate::config::{millis, Config};
use crate::pool::PoolConfig;
use crate::types::protocol::Capabilities;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("reading settings: {0}")]
    Io(#[from] io::Error),
    #[error("parsing settings: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// `host:port` or a `redis://` URL.
    pub address: String,
    /// Required: depends on the broker version deployed.
    pub capabilities: Capabilities,
    #[serde(default)]
    pub pool: PoolConfig,
    /// Applied to every operation unless overridden per call.
    #[serde(default)]
    pub defaults: Config,
    #[serde(default = "default_poll_interval", with = "millis")]
    pub poll_interval: Duration,
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

impl Settings {
    pub fn from_yaml(yaml: &str) -> Result<Self, SettingsError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        Self::from_yaml(&fs::read_to_string(path)?)
    }
}
