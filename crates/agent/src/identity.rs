//! Device identity resolution.
//!
//! The serial comes from the first signal that yields a value:
//! `/proc/cpuinfo`, the device tree, the hostname, then `unknown`. The
//! machine id and SSH host key fingerprint are only used to notice that the
//! same hardware was reflashed, which bumps `image_generation`.

use crate::config::IdentitySources;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// Serial used when no signal is available.
pub const UNKNOWN_SERIAL: &str = "unknown";

/// Host key files in preference order.
const HOST_KEY_FILES: [&str; 3] = [
    "ssh_host_ed25519_key.pub",
    "ssh_host_rsa_key.pub",
    "ssh_host_ecdsa_key.pub",
];

/// Identity reported to the hub.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub serial: String,
    pub machine_id: Option<String>,
    pub ssh_fingerprint: Option<String>,
    pub hostname: Option<String>,
    pub image_generation: i64,
}

/// Persisted between agent runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySnapshot {
    pub serial: String,
    pub machine_id: Option<String>,
    pub ssh_fingerprint: Option<String>,
    pub image_generation: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Generation for the current boot given the previous snapshot.
///
/// Same serial with a changed machine id or fingerprint means a new image
/// on the same hardware. A different serial starts over at zero.
pub fn next_generation(
    previous: Option<&IdentitySnapshot>,
    serial: &str,
    machine_id: Option<&str>,
    ssh_fingerprint: Option<&str>,
) -> i64 {
    let Some(previous) = previous else {
        return 0;
    };
    if previous.serial != serial {
        return 0;
    }

    let machine_changed = previous
        .machine_id
        .as_deref()
        .is_some_and(|saved| Some(saved) != machine_id);
    let fingerprint_changed = previous
        .ssh_fingerprint
        .as_deref()
        .is_some_and(|saved| Some(saved) != ssh_fingerprint);

    if machine_changed || fingerprint_changed {
        previous.image_generation.saturating_add(1)
    } else {
        previous.image_generation
    }
}

/// `ssh-keygen -l` style fingerprint of an OpenSSH public key line.
pub fn fingerprint_public_key(line: &str) -> Option<String> {
    let blob = line.split_whitespace().nth(1)?;
    let decoded = STANDARD.decode(blob).ok()?;
    let digest = Sha256::digest(&decoded);
    Some(format!("SHA256:{}", STANDARD_NO_PAD.encode(digest)))
}

/// Reads identity signals and maintains the snapshot file.
#[derive(Clone, Debug)]
pub struct IdentityResolver {
    sources: IdentitySources,
    state_file: PathBuf,
}

impl IdentityResolver {
    pub fn new(sources: IdentitySources, state_file: impl Into<PathBuf>) -> Self {
        Self {
            sources,
            state_file: state_file.into(),
        }
    }

    /// Resolve the identity and persist the updated snapshot. Never fails;
    /// missing signals are reported as absent.
    pub fn resolve(&self) -> ResolvedIdentity {
        let hostname = self.hostname();
        let serial = self.serial(hostname.as_deref());
        let machine_id = read_trimmed(&self.sources.machine_id_path);
        let ssh_fingerprint = self.ssh_fingerprint();

        let previous = self.load_snapshot();
        let image_generation = next_generation(
            previous.as_ref(),
            &serial,
            machine_id.as_deref(),
            ssh_fingerprint.as_deref(),
        );
        if let Some(previous) = &previous
            && image_generation > previous.image_generation
        {
            tracing::info!(
                serial = %serial,
                image_generation = image_generation,
                "Detected new image on the same hardware"
            );
        }

        self.save_snapshot(&IdentitySnapshot {
            serial: serial.clone(),
            machine_id: machine_id.clone(),
            ssh_fingerprint: ssh_fingerprint.clone(),
            image_generation,
            updated_at: OffsetDateTime::now_utc(),
        });

        ResolvedIdentity {
            serial,
            machine_id,
            ssh_fingerprint,
            hostname,
            image_generation,
        }
    }

    /// Current hostname, re-read on every call.
    pub fn hostname(&self) -> Option<String> {
        read_trimmed(&self.sources.hostname_path)
    }

    fn serial(&self, hostname: Option<&str>) -> String {
        if let Some(serial) = self.cpuinfo_serial() {
            return serial;
        }
        if let Some(serial) = self.device_tree_serial() {
            return serial;
        }
        if let Some(hostname) = hostname {
            tracing::warn!(hostname = %hostname, "No hardware serial found, using hostname");
            return hostname.to_string();
        }
        tracing::warn!("No identity signal available, using fallback serial");
        UNKNOWN_SERIAL.to_string()
    }

    fn cpuinfo_serial(&self) -> Option<String> {
        let cpuinfo = std::fs::read_to_string(&self.sources.cpuinfo_path).ok()?;
        cpuinfo
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(key, _)| key.trim() == "Serial")
            .map(|(_, value)| value.trim().to_string())
            .filter(|serial| !serial.is_empty() && !serial.chars().all(|c| c == '0'))
    }

    fn device_tree_serial(&self) -> Option<String> {
        let raw = std::fs::read(&self.sources.device_tree_serial_path).ok()?;
        let serial = String::from_utf8_lossy(&raw)
            .trim_matches(|c: char| c == '\0' || c.is_whitespace())
            .to_string();
        (!serial.is_empty()).then_some(serial)
    }

    fn ssh_fingerprint(&self) -> Option<String> {
        HOST_KEY_FILES.iter().find_map(|name| {
            let path = self.sources.ssh_host_key_dir.join(name);
            let line = std::fs::read_to_string(&path).ok()?;
            let fingerprint = fingerprint_public_key(&line);
            if fingerprint.is_none() {
                tracing::warn!(path = %path.display(), "Unparseable SSH host key");
            }
            fingerprint
        })
    }

    /// A missing or corrupt snapshot reads as none.
    pub fn load_snapshot(&self) -> Option<IdentitySnapshot> {
        let data = match std::fs::read(&self.state_file) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.state_file.display(), error = %e, "Failed to read identity snapshot");
                return None;
            }
        };
        match serde_json::from_slice(&data) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(
                    path = %self.state_file.display(),
                    error = %e,
                    "Ignoring corrupt identity snapshot"
                );
                None
            }
        }
    }

    fn save_snapshot(&self, snapshot: &IdentitySnapshot) {
        if let Err(e) = write_snapshot(&self.state_file, snapshot) {
            tracing::warn!(
                path = %self.state_file.display(),
                error = %e,
                "Failed to save identity snapshot"
            );
        }
    }
}

fn write_snapshot(path: &Path, snapshot: &IdentitySnapshot) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(snapshot).map_err(std::io::Error::other)?;
    std::fs::write(path, json)
}

fn read_trimmed(path: &Path) -> Option<String> {
    let value = std::fs::read_to_string(path).ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}
