//! Database models mapping to the metadata schema.
//!
//! Timestamps are stored as text (see `pwnhub_core::timestamp`). Rows decode
//! them leniently: a value that does not parse comes back as `None` rather
//! than failing the whole query, so one malformed record cannot hide the
//! rest of a listing.

use pwnhub_core::timestamp::parse_timestamp;
use pwnhub_core::{ArtifactRecord, DeviceRecord};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};
use time::OffsetDateTime;

fn lenient_timestamp(row: &SqliteRow, column: &str) -> Result<Option<OffsetDateTime>, sqlx::Error> {
    let raw: Option<String> = row.try_get(column)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

// =============================================================================
// Devices
// =============================================================================

/// Device record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRow {
    pub serial: String,
    pub name: Option<String>,
    pub hostname: Option<String>,
    pub ssh_fingerprint: Option<String>,
    pub image_generation: i64,
    pub handshake_count: i64,
    pub last_seen: Option<OffsetDateTime>,
    pub last_ip: Option<String>,
    pub ssh_provisioned: bool,
}

impl<'r> FromRow<'r, SqliteRow> for DeviceRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            serial: row.try_get("serial")?,
            name: row.try_get("name")?,
            hostname: row.try_get("hostname")?,
            ssh_fingerprint: row.try_get("ssh_fingerprint")?,
            image_generation: row.try_get("image_generation")?,
            handshake_count: row.try_get("handshake_count")?,
            last_seen: lenient_timestamp(row, "last_seen")?,
            last_ip: row.try_get("last_ip")?,
            ssh_provisioned: row.try_get("ssh_provisioned")?,
        })
    }
}

impl From<DeviceRow> for DeviceRecord {
    fn from(row: DeviceRow) -> Self {
        Self {
            serial: row.serial,
            name: row.name,
            hostname: row.hostname,
            ssh_fingerprint: row.ssh_fingerprint,
            image_generation: row.image_generation,
            handshake_count: row.handshake_count,
            last_seen: row.last_seen,
            last_ip: row.last_ip,
            ssh_provisioned: row.ssh_provisioned,
        }
    }
}

// =============================================================================
// Artifacts
// =============================================================================

/// Stored artifact record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRow {
    pub id: i64,
    pub serial: String,
    pub filename: String,
    pub size_bytes: i64,
    /// Hex SHA-256 of the file content.
    pub content_hash: String,
    /// `None` when the stored value is missing or unparseable.
    pub uploaded_at: Option<OffsetDateTime>,
}

impl<'r> FromRow<'r, SqliteRow> for ArtifactRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            serial: row.try_get("serial")?,
            filename: row.try_get("filename")?,
            size_bytes: row.try_get("size_bytes")?,
            content_hash: row.try_get("content_hash")?,
            uploaded_at: lenient_timestamp(row, "uploaded_at")?,
        })
    }
}

impl From<ArtifactRow> for ArtifactRecord {
    fn from(row: ArtifactRow) -> Self {
        Self {
            id: row.id,
            serial: row.serial,
            filename: row.filename,
            size_bytes: row.size_bytes,
            content_hash: row.content_hash,
            uploaded_at: row.uploaded_at,
        }
    }
}

/// Artifact to insert after its file has been written.
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub serial: String,
    pub filename: String,
    pub size_bytes: i64,
    pub content_hash: String,
    pub uploaded_at: OffsetDateTime,
}
