//! Capture file intake.
//!
//! Uploads are streamed to the object store while being hashed, then
//! recorded in metadata together with the device's counter bump. The
//! per-device lock is held from name allocation until the record commits,
//! so two uploads from one device in the same second get distinct names.

use crate::error::{ApiError, ApiResult};
use crate::locks::DeviceLocks;
use crate::metrics;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use pwnhub_core::{ContentHash, artifact_filename, validate_serial, with_collision_suffix};
use pwnhub_metadata::{ArtifactRow, MetadataStore, NewArtifact};
use pwnhub_storage::{ObjectStore, artifact_key};
use std::sync::Arc;
use time::OffsetDateTime;

/// Upper bound on `_N` suffixes tried before giving up on a name.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Stores uploaded capture files and their metadata.
#[derive(Clone)]
pub struct ArtifactStore {
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<dyn ObjectStore>,
    locks: DeviceLocks,
}

impl ArtifactStore {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn ObjectStore>,
        locks: DeviceLocks,
    ) -> Self {
        Self {
            metadata,
            storage,
            locks,
        }
    }

    /// Store one capture file for `serial`.
    ///
    /// Unknown serials get a pending device record first. Body errors abort
    /// the partial file. If the metadata insert fails after the file landed,
    /// the file is removed on a best-effort basis and the error returned.
    pub async fn store<S>(
        &self,
        serial: &str,
        original_name: Option<&str>,
        body: S,
    ) -> ApiResult<ArtifactRow>
    where
        S: Stream<Item = ApiResult<Bytes>> + Send,
    {
        validate_serial(serial)?;
        let now = OffsetDateTime::now_utc();

        if self.metadata.ensure_device(serial, now).await? {
            tracing::info!(serial = %serial, "Created pending device record for upload");
        }

        let _guard = self.locks.lock(serial).await;
        let filename = self.allocate_filename(serial, original_name, now).await?;
        let key = artifact_key(serial, &filename);

        let mut upload = self.storage.put_stream(&key).await.inspect_err(|_| {
            metrics::record_store_failure("open");
        })?;
        let mut hasher = ContentHash::hasher();
        let mut body = std::pin::pin!(body);

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    metrics::record_store_failure("body");
                    if let Err(abort_err) = upload.abort().await {
                        tracing::warn!(key = %key, error = %abort_err, "Failed to abort partial upload");
                    }
                    return Err(e);
                }
            };
            hasher.update(&chunk);
            if let Err(e) = upload.write(chunk).await {
                metrics::record_store_failure("write");
                if let Err(abort_err) = upload.abort().await {
                    tracing::warn!(key = %key, error = %abort_err, "Failed to abort partial upload");
                }
                return Err(e.into());
            }
        }

        let size_bytes = upload.finish().await.inspect_err(|_| {
            metrics::record_store_failure("finish");
        })?;
        let content_hash = hasher.finalize();

        let new_artifact = NewArtifact {
            serial: serial.to_string(),
            filename: filename.clone(),
            size_bytes: i64::try_from(size_bytes)
                .map_err(|_| ApiError::PayloadTooLarge(format!("{size_bytes} bytes")))?,
            content_hash: content_hash.to_hex(),
            uploaded_at: now,
        };

        let record = match self.metadata.record_artifact(&new_artifact).await {
            Ok(record) => record,
            Err(e) => {
                metrics::record_store_failure("metadata");
                match self.storage.delete(&key).await {
                    Ok(()) => {
                        tracing::warn!(key = %key, error = %e, "Metadata insert failed, removed stored file")
                    }
                    Err(delete_err) => tracing::warn!(
                        key = %key,
                        error = %e,
                        delete_error = %delete_err,
                        "Metadata insert failed, stored file is orphaned"
                    ),
                }
                return Err(e.into());
            }
        };

        metrics::ARTIFACTS_STORED.inc();
        metrics::ARTIFACT_BYTES_STORED.inc_by(size_bytes);
        tracing::info!(
            serial = %serial,
            filename = %record.filename,
            size_bytes = size_bytes,
            sha256 = %record.content_hash,
            "Stored capture file"
        );

        Ok(record)
    }

    /// Pick a name free in both the object store and metadata.
    /// Caller must hold the device lock.
    async fn allocate_filename(
        &self,
        serial: &str,
        original_name: Option<&str>,
        at: OffsetDateTime,
    ) -> ApiResult<String> {
        let base = artifact_filename(original_name, at);
        for n in 0..MAX_NAME_ATTEMPTS {
            let candidate = if n == 0 {
                base.clone()
            } else {
                with_collision_suffix(&base, n)
            };
            let taken_on_disk = self
                .storage
                .exists(&artifact_key(serial, &candidate))
                .await?;
            if taken_on_disk {
                continue;
            }
            if self
                .metadata
                .get_artifact(serial, &candidate)
                .await?
                .is_none()
            {
                return Ok(candidate);
            }
        }
        Err(ApiError::Conflict(format!(
            "no free filename for {base} after {MAX_NAME_ATTEMPTS} attempts"
        )))
    }
}
