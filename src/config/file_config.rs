use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub tenant_directory: Option<String>,
    pub sweep_interval_secs: Option<u64>,

    // Feature configs
    pub scheduler: Option<SchedulerFileConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SchedulerFileConfig {
    /// Lease staleness SLA for lightweight index types, in minutes.
    pub lease_timeout_short_mins: Option<i64>,
    /// Lease staleness SLA for the heavy index type, in minutes.
    pub lease_timeout_long_mins: Option<i64>,
    /// Consecutive failures after which a snapshot stops being retried.
    pub max_failed_attempts: Option<i32>,
    /// Priority for configs created during reconciliation.
    pub default_priority: Option<i32>,
    /// Refresh frequency for configs created during reconciliation.
    pub default_frequency_mins: Option<i64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
