//! Configuration types for the hub.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Largest accepted upload request body in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_max_upload_bytes() -> u64 {
    512 * 1024 * 1024
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Artifact storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage, one directory per device serial.
    Filesystem {
        /// Root directory for artifacts.
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/handshakes"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::Filesystem { path } if path.as_os_str().is_empty() => {
                Err("storage.path must not be empty".to_string())
            }
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// How long a connection waits on a locked database before failing.
        #[serde(default = "default_sqlite_busy_timeout_secs")]
        busy_timeout_secs: u64,
    },
}

fn default_sqlite_busy_timeout_secs() -> u64 {
    5
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/pwnhub.db"),
            busy_timeout_secs: default_sqlite_busy_timeout_secs(),
        }
    }
}

/// Artifact retention configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Run the retention engine on a timer (default: true).
    #[serde(default = "default_retention_enabled")]
    pub enabled: bool,
    /// Seconds between retention passes (default: 1 hour).
    #[serde(default = "default_retention_interval_secs")]
    pub interval_secs: u64,
    /// Artifacts uploaded longer ago than this are deleted (default: 30 days).
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    /// Per-device storage quota in bytes (default: 10 GiB).
    #[serde(default = "default_max_bytes_per_device")]
    pub max_bytes_per_device: u64,
    /// Pause after a failed pass before the scheduler resumes (default: 60s).
    #[serde(default = "default_error_cooldown_secs")]
    pub error_cooldown_secs: u64,
}

fn default_retention_enabled() -> bool {
    true
}

fn default_retention_interval_secs() -> u64 {
    3600
}

fn default_max_age_secs() -> u64 {
    30 * 24 * 3600
}

fn default_max_bytes_per_device() -> u64 {
    10 * 1024 * 1024 * 1024
}

fn default_error_cooldown_secs() -> u64 {
    60
}

/// Longest retention timer accepted (one year). Timer deadlines past this
/// are clamped so they cannot overflow the clock.
pub const MAX_RETENTION_INTERVAL_SECS: u64 = 366 * 24 * 60 * 60;

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: default_retention_enabled(),
            interval_secs: default_retention_interval_secs(),
            max_age_secs: default_max_age_secs(),
            max_bytes_per_device: default_max_bytes_per_device(),
            error_cooldown_secs: default_error_cooldown_secs(),
        }
    }
}

impl RetentionConfig {
    /// Maximum artifact age as a Duration.
    pub fn max_age(&self) -> Duration {
        // Saturate rather than wrap; validate() rejects these values anyway.
        Duration::seconds(i64::try_from(self.max_age_secs).unwrap_or(i64::MAX))
    }

    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs.min(MAX_RETENTION_INTERVAL_SECS))
    }

    pub fn error_cooldown(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.error_cooldown_secs.min(MAX_RETENTION_INTERVAL_SECS))
    }

    /// Validate retention configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_secs == 0 {
            return Err("retention.interval_secs must be greater than zero".to_string());
        }
        if self.interval_secs > MAX_RETENTION_INTERVAL_SECS {
            return Err(format!(
                "retention.interval_secs {} exceeds maximum value {MAX_RETENTION_INTERVAL_SECS}",
                self.interval_secs
            ));
        }
        if self.error_cooldown_secs > MAX_RETENTION_INTERVAL_SECS {
            return Err(format!(
                "retention.error_cooldown_secs {} exceeds maximum value {MAX_RETENTION_INTERVAL_SECS}",
                self.error_cooldown_secs
            ));
        }
        if self.max_age_secs > i64::MAX as u64 {
            return Err(format!(
                "retention.max_age_secs {} exceeds maximum value {}",
                self.max_age_secs,
                i64::MAX
            ));
        }
        if self.max_bytes_per_device > i64::MAX as u64 {
            return Err(format!(
                "retention.max_bytes_per_device {} exceeds maximum value {}",
                self.max_bytes_per_device,
                i64::MAX
            ));
        }
        Ok(())
    }
}

/// SSH key provisioning configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProvisionConfig {
    /// Public key installed on devices.
    #[serde(default = "default_public_key_path")]
    pub public_key_path: PathBuf,
    /// Script invoked as `<script> <ip> <user>`.
    #[serde(default = "default_script_path")]
    pub script_path: PathBuf,
    /// Login user on the device.
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,
    /// Script timeout in seconds (default: 30).
    #[serde(default = "default_provision_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_public_key_path() -> PathBuf {
    PathBuf::from("./data/keys/pwnhub_id_ed25519.pub")
}

fn default_script_path() -> PathBuf {
    PathBuf::from("./scripts/provision-ssh-key.sh")
}

fn default_ssh_user() -> String {
    "pi".to_string()
}

fn default_provision_timeout_secs() -> u64 {
    30
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            public_key_path: default_public_key_path(),
            script_path: default_script_path(),
            ssh_user: default_ssh_user(),
            timeout_secs: default_provision_timeout_secs(),
        }
    }
}

impl ProvisionConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

/// Complete hub configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub provision: ProvisionConfig,
}

impl AppConfig {
    /// Validate every section, returning the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.retention.validate()?;
        if self.server.max_upload_bytes == 0 {
            return Err("server.max_upload_bytes must be greater than zero".to_string());
        }
        Ok(())
    }
}
