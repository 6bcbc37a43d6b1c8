//! Agent configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Longest interval, cooldown or timeout accepted (one year). Durations
/// past this are clamped so timer deadlines cannot overflow.
pub const MAX_TIMER_SECS: u64 = 366 * 24 * 60 * 60;

/// Where the identity resolver reads its signals from.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdentitySources {
    #[serde(default = "default_cpuinfo_path")]
    pub cpuinfo_path: PathBuf,
    #[serde(default = "default_device_tree_serial_path")]
    pub device_tree_serial_path: PathBuf,
    #[serde(default = "default_machine_id_path")]
    pub machine_id_path: PathBuf,
    #[serde(default = "default_hostname_path")]
    pub hostname_path: PathBuf,
    /// Directory holding `ssh_host_*_key.pub`.
    #[serde(default = "default_ssh_host_key_dir")]
    pub ssh_host_key_dir: PathBuf,
}

fn default_cpuinfo_path() -> PathBuf {
    PathBuf::from("/proc/cpuinfo")
}

fn default_device_tree_serial_path() -> PathBuf {
    PathBuf::from("/proc/device-tree/serial-number")
}

fn default_machine_id_path() -> PathBuf {
    PathBuf::from("/etc/machine-id")
}

fn default_hostname_path() -> PathBuf {
    PathBuf::from("/proc/sys/kernel/hostname")
}

fn default_ssh_host_key_dir() -> PathBuf {
    PathBuf::from("/etc/ssh")
}

impl Default for IdentitySources {
    fn default() -> Self {
        Self {
            cpuinfo_path: default_cpuinfo_path(),
            device_tree_serial_path: default_device_tree_serial_path(),
            machine_id_path: default_machine_id_path(),
            hostname_path: default_hostname_path(),
            ssh_host_key_dir: default_ssh_host_key_dir(),
        }
    }
}

/// Complete agent configuration. Loaded once and passed to each component.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base URL of the hub, e.g. `http://10.67.0.1:8000`.
    pub hub_url: String,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Pause after a failed heartbeat (default: 60).
    #[serde(default = "default_error_cooldown_secs")]
    pub error_cooldown_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Directory the capture tool writes into.
    #[serde(default = "default_handshake_dir")]
    pub handshake_dir: PathBuf,
    /// File extensions counted as captures, with leading dot.
    #[serde(default = "default_capture_extensions")]
    pub capture_extensions: Vec<String>,
    /// Persisted identity snapshot.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default)]
    pub identity: IdentitySources,
}

fn default_heartbeat_interval_secs() -> u64 {
    300
}

fn default_error_cooldown_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_handshake_dir() -> PathBuf {
    PathBuf::from("/root/handshakes")
}

fn default_capture_extensions() -> Vec<String> {
    vec![".cap".to_string(), ".pcap".to_string(), ".hccapx".to_string()]
}

fn default_state_file() -> PathBuf {
    PathBuf::from("/root/.pwnhub_agent_id")
}

impl AgentConfig {
    /// Config pointing at `hub_url` with every other field defaulted.
    pub fn new(hub_url: impl Into<String>) -> Self {
        Self {
            hub_url: hub_url.into(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            error_cooldown_secs: default_error_cooldown_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            handshake_dir: default_handshake_dir(),
            capture_extensions: default_capture_extensions(),
            state_file: default_state_file(),
            identity: IdentitySources::default(),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.min(MAX_TIMER_SECS))
    }

    pub fn error_cooldown(&self) -> Duration {
        Duration::from_secs(self.error_cooldown_secs.min(MAX_TIMER_SECS))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.min(MAX_TIMER_SECS))
    }

    /// Validate agent configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.hub_url.trim().is_empty() {
            return Err("hub_url cannot be empty".to_string());
        }
        if reqwest::Url::parse(&self.hub_url).is_err() {
            return Err(format!("hub_url is not a valid URL: {}", self.hub_url));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err("heartbeat_interval_secs must be greater than zero".to_string());
        }
        if self.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be greater than zero".to_string());
        }
        for (name, value) in [
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("error_cooldown_secs", self.error_cooldown_secs),
            ("request_timeout_secs", self.request_timeout_secs),
        ] {
            if value > MAX_TIMER_SECS {
                return Err(format!("{name} {value} exceeds maximum value {MAX_TIMER_SECS}"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_toml() {
        let config: AgentConfig = figment::Figment::new()
            .merge(figment::providers::Serialized::default(
                "hub_url",
                "http://10.67.0.1:8000",
            ))
            .extract()
            .unwrap();

        assert_eq!(config.heartbeat_interval_secs, 300);
        assert_eq!(config.error_cooldown_secs, 60);
        assert_eq!(config.capture_extensions, vec![".cap", ".pcap", ".hccapx"]);
        assert_eq!(config.state_file, PathBuf::from("/root/.pwnhub_agent_id"));
        assert_eq!(
            config.identity.machine_id_path,
            PathBuf::from("/etc/machine-id")
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_hub_url_fails_extraction() {
        let result: Result<AgentConfig, _> = figment::Figment::new().extract();
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AgentConfig::new("not a url");
        assert!(config.validate().is_err());

        config.hub_url = "http://hub:8000".to_string();
        config.heartbeat_interval_secs = 0;
        assert!(config.validate().unwrap_err().contains("heartbeat_interval_secs"));
    }

    #[test]
    fn test_oversized_timers_rejected_and_clamped() {
        let mut config = AgentConfig::new("http://hub:8000");
        config.heartbeat_interval_secs = u64::MAX;
        assert!(config.validate().unwrap_err().contains("heartbeat_interval_secs"));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(MAX_TIMER_SECS));

        config.heartbeat_interval_secs = 300;
        config.error_cooldown_secs = u64::MAX;
        assert!(config.validate().unwrap_err().contains("error_cooldown_secs"));
        assert_eq!(config.error_cooldown(), Duration::from_secs(MAX_TIMER_SECS));

        config.error_cooldown_secs = MAX_TIMER_SECS;
        assert!(config.validate().is_ok());
    }
}
