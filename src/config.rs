//! Node configuration.
//!
//! Every key has a default, so a config file only needs the keys it changes.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Period of the local publish sweep. Zero or less disables the task.
    pub publish_period_seconds: i64,
    /// Period of the publish record expiry sweep. Zero or less disables it.
    pub expire_period_seconds: i64,
    pub publish_object_interstitial_sleep_millis: u64,

    pub store_capacity_bytes: u64,
    /// Directory of the on-disk blob store, in memory when unset.
    pub data_dir: Option<PathBuf>,

    /// Hop budget of a routed message.
    pub message_ttl: i32,
    pub replica_wait_warn_millis: u64,
    pub max_replication_rounds: usize,
    pub default_replication_store: u32,
    pub backup_publish_count: usize,

    pub request_timeout_millis: u64,
    pub retry_attempts: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            publish_period_seconds: 3600,
            expire_period_seconds: 600,
            publish_object_interstitial_sleep_millis: 0,
            store_capacity_bytes: 1 << 30,
            data_dir: None,
            message_ttl: 32,
            replica_wait_warn_millis: 10_000,
            max_replication_rounds: 8,
            default_replication_store: 1,
            backup_publish_count: 2,
            request_timeout_millis: 2000,
            retry_attempts: 3,
        }
    }
}

impl PoolConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_millis)
    }
}
