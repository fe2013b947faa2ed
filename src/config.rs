use crate::error::AppError;
use crate::services::retry_policy::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable pointing at an alternative config file
pub const CONFIG_ENV: &str = "FIELDSYNC_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "fieldsync.toml";

/// Tuning knobs for the offline queue and sync, read from `fieldsync.toml`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Overrides the platform data directory
    pub data_dir: Option<PathBuf>,
    /// Upper bound for all queued data in bytes
    pub store_quota_bytes: Option<usize>,
    pub upload_timeout_secs: u64,
    pub record_timeout_secs: u64,
    pub photo_gps_timeout_secs: u64,
    pub check_in_gps_timeout_secs: u64,
    pub report_gps_timeout_secs: u64,
    /// Interval of the backend reachability probe
    pub probe_interval_secs: u64,
    /// Check-ins further away than this need confirmation
    pub max_site_distance_m: f64,
    /// Direct uploads are attempted this often before giving up
    pub upload_attempts: u32,
    /// Pause after the n-th failed direct upload is n times this
    pub upload_retry_pause_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            store_quota_bytes: Some(50 * 1024 * 1024),
            upload_timeout_secs: 30,
            record_timeout_secs: 15,
            photo_gps_timeout_secs: 3,
            check_in_gps_timeout_secs: 10,
            report_gps_timeout_secs: 5,
            probe_interval_secs: 15,
            max_site_distance_m: 500.0,
            upload_attempts: 3,
            upload_retry_pause_ms: 1000,
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Loads the config from `$FIELDSYNC_CONFIG` or `./fieldsync.toml`.
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self, AppError> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(s: &str) -> Result<Self, AppError> {
        toml::from_str(s).map_err(|e| AppError::Config(format!("Invalid config: {}", e)))
    }

    pub fn to_toml(&self) -> Result<String, AppError> {
        toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("Config serialize failed: {}", e)))
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn record_timeout(&self) -> Duration {
        Duration::from_secs(self.record_timeout_secs)
    }

    pub fn photo_gps_timeout(&self) -> Duration {
        Duration::from_secs(self.photo_gps_timeout_secs)
    }

    pub fn check_in_gps_timeout(&self) -> Duration {
        Duration::from_secs(self.check_in_gps_timeout_secs)
    }

    pub fn report_gps_timeout(&self) -> Duration {
        Duration::from_secs(self.report_gps_timeout_secs)
    }

    pub fn upload_retry_pause(&self) -> Duration {
        Duration::from_millis(self.upload_retry_pause_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }
}
