//! Runtime configuration for the syncforge server.
//!
//! Loaded from a TOML file; every section has working defaults so a bare
//! `SyncforgeConfig::default()` is usable in tests and local runs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::SyncforgeError;

/// Configuration store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory for persisted entity records.
    pub root: PathBuf,
    /// Number of concurrent workers used during startup restore.
    pub restore_workers: usize,
    /// Wall-clock budget for restoring one entity type, in seconds.
    pub restore_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./syncforge-data/store"),
            restore_workers: 8,
            restore_timeout_secs: 300,
        }
    }
}

/// Trigger scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Minimum allowed policy frequency, in seconds.
    pub min_frequency_secs: u64,
    /// Interval at which the dangling-trigger reaper scans, in seconds.
    pub reaper_interval_secs: u64,
    /// Grace period for shutting down running jobs, in seconds.
    pub quiesce_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_frequency_secs: 60,
            reaper_interval_secs: 2,
            quiesce_timeout_secs: 30,
        }
    }
}

/// Housekeeping settings for retired records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HousekeepingConfig {
    /// How often the cleanup job runs, in hours.
    pub cleanup_frequency_hours: u64,
    /// Retired records older than this many days are purged.
    pub retired_older_than_days: u64,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            cleanup_frequency_hours: 24,
            retired_older_than_days: 90,
        }
    }
}

/// Identity of this server process within its cluster pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Index of this server, embedded in generated policy ids.
    pub server_index: u32,
    /// Name of the cluster this server schedules for.
    pub local_cluster: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_index: 0,
            local_cluster: "local".to_string(),
        }
    }
}

/// Top-level syncforge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncforgeConfig {
    pub store: StoreConfig,
    pub scheduler: SchedulerConfig,
    pub housekeeping: HousekeepingConfig,
    pub server: ServerConfig,
}

impl SyncforgeConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self, SyncforgeError> {
        let raw = std::fs::read_to_string(path)?;
        let config: SyncforgeConfig = toml::from_str(&raw)
            .map_err(|e| SyncforgeError::Validation(format!("config parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<(), SyncforgeError> {
        if self.store.restore_workers == 0 {
            return Err(SyncforgeError::Validation(
                "store.restore_workers must be at least 1".to_string(),
            ));
        }
        if self.store.restore_timeout_secs == 0 {
            return Err(SyncforgeError::Validation(
                "store.restore_timeout_secs must be positive".to_string(),
            ));
        }
        if self.scheduler.min_frequency_secs == 0 {
            return Err(SyncforgeError::Validation(
                "scheduler.min_frequency_secs must be positive".to_string(),
            ));
        }
        if self.housekeeping.cleanup_frequency_hours == 0 {
            return Err(SyncforgeError::Validation(
                "housekeeping.cleanup_frequency_hours must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = SyncforgeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.restore_workers, 8);
        assert_eq!(config.scheduler.min_frequency_secs, 60);
        assert_eq!(config.housekeeping.retired_older_than_days, 90);
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[store]\nroot = \"/var/lib/syncforge\"\n\n[server]\nserver_index = 2\nlocal_cluster = \"dc1-primary\"\n"
        )
        .unwrap();

        let config = SyncforgeConfig::load(file.path()).unwrap();
        assert_eq!(config.store.root, PathBuf::from("/var/lib/syncforge"));
        assert_eq!(config.server.server_index, 2);
        assert_eq!(config.server.local_cluster, "dc1-primary");
        // untouched sections keep their defaults
        assert_eq!(config.scheduler.reaper_interval_secs, 2);
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not valid toml [").unwrap();
        let result = SyncforgeConfig::load(file.path());
        assert!(matches!(result, Err(SyncforgeError::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = SyncforgeConfig::default();
        config.store.restore_workers = 0;
        assert!(matches!(
            config.validate(),
            Err(SyncforgeError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_frequency() {
        let mut config = SyncforgeConfig::default();
        config.scheduler.min_frequency_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(SyncforgeError::Validation(_))
        ));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let result = SyncforgeConfig::load(Path::new("/nonexistent/syncforge.toml"));
        assert!(matches!(result, Err(SyncforgeError::Io(_))));
    }
}
