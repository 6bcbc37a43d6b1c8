//! Device registry repository.

use crate::error::MetadataResult;
use crate::models::DeviceRow;
use async_trait::async_trait;
use pwnhub_core::{HeartbeatRequest, RegisterRequest};
use time::OffsetDateTime;

/// Repository for device records.
#[async_trait]
pub trait DeviceRepo: Send + Sync {
    /// Create or fully replace a device from a registration.
    ///
    /// hostname, ssh_fingerprint, image_generation, handshake_count,
    /// last_seen and last_ip are all overwritten; fields missing from the
    /// request become zero or null. `name` and `ssh_provisioned` are kept.
    async fn register_device(
        &self,
        request: &RegisterRequest,
        client_ip: Option<&str>,
        now: OffsetDateTime,
    ) -> MetadataResult<DeviceRow>;

    /// Apply a sparse heartbeat update.
    ///
    /// Only fields present in the request are written; last_seen and
    /// last_ip always are. Returns `NotFound` for an unregistered serial.
    async fn heartbeat_device(
        &self,
        request: &HeartbeatRequest,
        client_ip: Option<&str>,
        now: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Insert a pending device with every optional field null.
    /// Returns false if the serial already existed.
    async fn ensure_device(&self, serial: &str, now: OffsetDateTime) -> MetadataResult<bool>;

    /// Get a device by serial.
    async fn get_device(&self, serial: &str) -> MetadataResult<Option<DeviceRow>>;

    /// All devices, most recently seen first, never-seen last.
    async fn list_devices(&self) -> MetadataResult<Vec<DeviceRow>>;

    /// Record the outcome of SSH key provisioning.
    async fn set_ssh_provisioned(&self, serial: &str, provisioned: bool) -> MetadataResult<()>;
}
