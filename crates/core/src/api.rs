//! Wire types exchanged between agents and the hub.

use crate::patch::Patch;
use crate::serial::validate_serial;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// `POST /api/devices/register` body.
///
/// Registration is an authoritative snapshot: every field not sent is reset
/// (counters to zero, text fields to null).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub serial: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub ssh_fingerprint: Option<String>,
    #[serde(default)]
    pub image_generation: Option<i64>,
    #[serde(default)]
    pub handshake_count: Option<i64>,
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<()> {
        validate_serial(&self.serial)?;
        non_negative("image_generation", self.image_generation)?;
        non_negative("handshake_count", self.handshake_count)
    }
}

/// `POST /api/devices/heartbeat` body.
///
/// Only keys present in the request are written. `hostname` and
/// `ssh_fingerprint` may be sent as `null` to clear them; the counters are
/// not nullable.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub serial: String,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub hostname: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub ssh_fingerprint: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub image_generation: Patch<i64>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub handshake_count: Patch<i64>,
}

impl HeartbeatRequest {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_serial(&self.serial)?;
        for (field, patch) in [
            ("image_generation", &self.image_generation),
            ("handshake_count", &self.handshake_count),
        ] {
            match patch {
                Patch::Null => {
                    return Err(Error::InvalidField {
                        field,
                        reason: "must not be null".to_string(),
                    });
                }
                Patch::Value(v) => non_negative(field, Some(*v))?,
                Patch::Absent => {}
            }
        }
        Ok(())
    }
}

fn non_negative(field: &'static str, value: Option<i64>) -> Result<()> {
    match value {
        Some(v) if v < 0 => Err(Error::InvalidField {
            field,
            reason: format!("must be non-negative, got {v}"),
        }),
        _ => Ok(()),
    }
}

/// A device as reported by the hub.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub serial: String,
    pub name: Option<String>,
    pub hostname: Option<String>,
    pub ssh_fingerprint: Option<String>,
    pub image_generation: i64,
    pub handshake_count: i64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_seen: Option<OffsetDateTime>,
    pub last_ip: Option<String>,
    pub ssh_provisioned: bool,
}

/// Metadata for one stored artifact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: i64,
    pub serial: String,
    pub filename: String,
    pub size_bytes: i64,
    /// Hex SHA-256 of the stored file.
    #[serde(rename = "sha256")]
    pub content_hash: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub uploaded_at: Option<OffsetDateTime>,
}

/// `GET /api/handshakes` response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactList {
    pub handshakes: Vec<ArtifactRecord>,
}

/// `POST /api/handshakes/upload` response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status: String,
    pub filename: String,
    pub sha256: String,
    pub size_bytes: i64,
}
