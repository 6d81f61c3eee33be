mod file_config;

pub use file_config::{FileConfig, SchedulerFileConfig};

use crate::scheduler_store::{MAX_PRIORITY, MIN_PRIORITY};
use anyhow::{bail, Result};
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub tenant_directory: Option<PathBuf>,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub tenant_directory: Option<PathBuf>,

    // Scheduler settings (with defaults)
    pub scheduler: SchedulerSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let tenant_directory = file
            .tenant_directory
            .map(PathBuf::from)
            .or_else(|| cli.tenant_directory.clone());
        if let Some(path) = &tenant_directory {
            if !path.exists() {
                bail!("Tenant directory file not found: {:?}", path);
            }
        }

        let sweep_interval_secs = file.sweep_interval_secs.unwrap_or(cli.sweep_interval_secs);

        // Scheduler settings - merge file config with defaults
        let scheduler_file = file.scheduler.unwrap_or_default();
        let defaults = SchedulerSettings::default();
        let scheduler = SchedulerSettings {
            sweep_interval_secs,
            lease_timeout_short_mins: scheduler_file
                .lease_timeout_short_mins
                .unwrap_or(defaults.lease_timeout_short_mins),
            lease_timeout_long_mins: scheduler_file
                .lease_timeout_long_mins
                .unwrap_or(defaults.lease_timeout_long_mins),
            max_failed_attempts: scheduler_file
                .max_failed_attempts
                .unwrap_or(defaults.max_failed_attempts),
            default_priority: scheduler_file
                .default_priority
                .unwrap_or(defaults.default_priority),
            default_frequency_mins: scheduler_file
                .default_frequency_mins
                .unwrap_or(defaults.default_frequency_mins),
        };
        scheduler.validate()?;

        Ok(Self {
            db_dir,
            tenant_directory,
            scheduler,
        })
    }

    pub fn scheduler_db_path(&self) -> PathBuf {
        self.db_dir.join("scheduler.db")
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Seconds between promotion sweeps.
    pub sweep_interval_secs: u64,
    /// Lease staleness SLA for lightweight index types, in minutes.
    pub lease_timeout_short_mins: i64,
    /// Lease staleness SLA for the heavy index type, in minutes.
    pub lease_timeout_long_mins: i64,
    /// Consecutive failures after which a snapshot stops being retried.
    pub max_failed_attempts: i32,
    /// Priority assigned to configs created during reconciliation.
    pub default_priority: i32,
    /// Refresh frequency assigned to configs created during reconciliation.
    pub default_frequency_mins: i64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 300,
            lease_timeout_short_mins: 30,
            lease_timeout_long_mins: 120,
            max_failed_attempts: 5,
            default_priority: 1,
            default_frequency_mins: 60,
        }
    }
}

impl SchedulerSettings {
    fn validate(&self) -> Result<()> {
        if self.lease_timeout_short_mins <= 0 || self.lease_timeout_long_mins <= 0 {
            bail!("Lease timeouts must be positive");
        }
        if self.lease_timeout_long_mins < self.lease_timeout_short_mins {
            bail!(
                "Long lease timeout ({} mins) must not be shorter than the short one ({} mins)",
                self.lease_timeout_long_mins,
                self.lease_timeout_short_mins
            );
        }
        if self.max_failed_attempts <= 0 {
            bail!("max_failed_attempts must be positive");
        }
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&self.default_priority) {
            bail!(
                "default_priority must be within {}..={}",
                MIN_PRIORITY,
                MAX_PRIORITY
            );
        }
        if self.default_frequency_mins <= 0 {
            bail!("default_frequency_mins must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_temp_db_dir() -> TempDir {
        TempDir::new().unwrap()
    }

    #[test]
    fn test_resolve_cli_only() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            tenant_directory: None,
            sweep_interval_secs: 120,
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.db_dir, temp_dir.path());
        assert!(config.tenant_directory.is_none());
        assert_eq!(config.scheduler.sweep_interval_secs, 120);
        assert_eq!(config.scheduler.lease_timeout_short_mins, 30);
        assert_eq!(config.scheduler.lease_timeout_long_mins, 120);
        assert_eq!(config.scheduler.max_failed_attempts, 5);
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/should/be/overridden")),
            sweep_interval_secs: 300,
            ..Default::default()
        };

        let file_config = FileConfig {
            db_dir: Some(temp_dir.path().to_string_lossy().to_string()),
            sweep_interval_secs: Some(60),
            scheduler: Some(SchedulerFileConfig {
                lease_timeout_short_mins: Some(15),
                max_failed_attempts: Some(3),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        assert_eq!(config.db_dir, temp_dir.path());
        assert_eq!(config.scheduler.sweep_interval_secs, 60);
        assert_eq!(config.scheduler.lease_timeout_short_mins, 15);
        assert_eq!(config.scheduler.max_failed_attempts, 3);
        // Untouched fields keep their defaults
        assert_eq!(config.scheduler.lease_timeout_long_mins, 120);
    }

    #[test]
    fn test_resolve_missing_db_dir_error() {
        let cli = CliConfig::default();
        let result = AppConfig::resolve(&cli, None);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("db_dir must be specified"));
    }

    #[test]
    fn test_resolve_nonexistent_db_dir_error() {
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/nonexistent/path/that/should/not/exist")),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("does not exist"));
    }

    #[test]
    fn test_resolve_rejects_inverted_lease_timeouts() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        };
        let file_config = FileConfig {
            scheduler: Some(SchedulerFileConfig {
                lease_timeout_short_mins: Some(120),
                lease_timeout_long_mins: Some(30),
                ..Default::default()
            }),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, Some(file_config));
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_rejects_bad_default_priority() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        };
        let file_config = FileConfig {
            scheduler: Some(SchedulerFileConfig {
                default_priority: Some(9),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli, Some(file_config)).is_err());
    }

    #[test]
    fn test_resolve_missing_tenant_directory_error() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            tenant_directory: Some(PathBuf::from("/nonexistent/tenants.toml")),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("not found"));
    }

    #[test]
    fn test_db_path_helper() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli, None).unwrap();
        assert_eq!(
            config.scheduler_db_path(),
            temp_dir.path().join("scheduler.db")
        );
    }
}
