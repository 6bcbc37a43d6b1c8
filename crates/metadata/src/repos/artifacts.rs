//! Artifact metadata repository.

use crate::error::MetadataResult;
use crate::models::{ArtifactRow, NewArtifact};
use async_trait::async_trait;

/// Repository for artifact records.
#[async_trait]
pub trait ArtifactRepo: Send + Sync {
    /// Insert an artifact and increment its device's `handshake_count`.
    ///
    /// Both writes share one transaction. Returns `NotFound` if the device
    /// does not exist and `AlreadyExists` if the filename is taken.
    async fn record_artifact(&self, artifact: &NewArtifact) -> MetadataResult<ArtifactRow>;

    /// Get an artifact by device and stored filename.
    async fn get_artifact(&self, serial: &str, filename: &str)
    -> MetadataResult<Option<ArtifactRow>>;

    /// All artifacts, newest first.
    async fn list_artifacts(&self) -> MetadataResult<Vec<ArtifactRow>>;

    /// One device's artifacts, newest first.
    async fn list_device_artifacts(&self, serial: &str) -> MetadataResult<Vec<ArtifactRow>>;

    /// One device's artifacts, oldest first (retention order).
    async fn list_device_artifacts_oldest_first(
        &self,
        serial: &str,
    ) -> MetadataResult<Vec<ArtifactRow>>;

    /// Delete an artifact record. Returns false if it was already gone.
    async fn delete_artifact(&self, id: i64) -> MetadataResult<bool>;

    /// Set the device's `handshake_count` to its actual number of artifact
    /// records and return that number.
    async fn recount_handshakes(&self, serial: &str) -> MetadataResult<i64>;
}
