//! SSH key provisioning.
//!
//! Runs an operator-supplied script as `<script> <ip> <user>` with the path
//! of the hub's public key in `PWNHUB_PUBLIC_KEY`. The script does the actual
//! copy, typically through `ssh-copy-id -i`.

use crate::error::ApiError;
use pwnhub_core::config::ProvisionConfig;
use std::net::Ipv4Addr;
use std::process::Stdio;
use tokio::process::Command;

/// Environment variable carrying the public key path to the script.
pub const PUBLIC_KEY_ENV: &str = "PWNHUB_PUBLIC_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("device has no known IP address")]
    MissingIp,

    #[error("device IP {0} is not an IPv4 address")]
    InvalidIp(String),

    #[error("public key not found at {0}")]
    MissingKey(String),

    #[error("provisioning script not found at {0}")]
    MissingScript(String),

    #[error("provisioning script timed out after {0}s")]
    Timeout(u64),

    #[error("provisioning script exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("failed to run provisioning script: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProvisionError> for ApiError {
    fn from(e: ProvisionError) -> Self {
        match e {
            ProvisionError::MissingIp | ProvisionError::InvalidIp(_) => {
                ApiError::BadRequest(e.to_string())
            }
            ProvisionError::Timeout(_) => ApiError::Timeout(e.to_string()),
            _ => ApiError::Internal(e.to_string()),
        }
    }
}

/// Installs the hub's SSH key on devices.
#[derive(Clone, Debug)]
pub struct Provisioner {
    config: ProvisionConfig,
}

impl Provisioner {
    pub fn new(config: ProvisionConfig) -> Self {
        Self { config }
    }

    /// Run the script against `last_ip`. Returns the script's stdout.
    pub async fn provision(&self, last_ip: Option<&str>) -> Result<(Ipv4Addr, String), ProvisionError> {
        let raw_ip = last_ip.ok_or(ProvisionError::MissingIp)?;
        let ip: Ipv4Addr = raw_ip
            .parse()
            .map_err(|_| ProvisionError::InvalidIp(raw_ip.to_string()))?;

        if !tokio::fs::try_exists(&self.config.public_key_path)
            .await
            .unwrap_or(false)
        {
            return Err(ProvisionError::MissingKey(
                self.config.public_key_path.display().to_string(),
            ));
        }
        if !tokio::fs::try_exists(&self.config.script_path)
            .await
            .unwrap_or(false)
        {
            return Err(ProvisionError::MissingScript(
                self.config.script_path.display().to_string(),
            ));
        }

        let mut command = Command::new(&self.config.script_path);
        command
            .arg(ip.to_string())
            .arg(&self.config.ssh_user)
            .env(PUBLIC_KEY_ENV, &self.config.public_key_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!(
            ip = %ip,
            user = %self.config.ssh_user,
            script = %self.config.script_path.display(),
            "Running SSH provisioning script"
        );

        // Dropping the output future on timeout kills the child.
        let output = tokio::time::timeout(self.config.timeout(), command.output())
            .await
            .map_err(|_| ProvisionError::Timeout(self.config.timeout_secs))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let detail = if !stderr.is_empty() {
                stderr
            } else if !stdout.is_empty() {
                stdout
            } else {
                "no output".to_string()
            };
            return Err(ProvisionError::Failed {
                status: output.status.to_string(),
                stderr: detail,
            });
        }

        Ok((ip, String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }
}
