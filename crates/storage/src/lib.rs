//! Artifact file storage for the pwnhub hub.
//!
//! Objects are addressed by string keys of the form `<serial>/<filename>`.
//! The filesystem backend maps each key to a path under a configured root,
//! which gives one directory per device.

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use error::{StorageError, StorageResult};
pub use traits::{ByteStream, ObjectMeta, ObjectStore, StreamingUpload};

use pwnhub_core::config::StorageConfig;
use std::sync::Arc;

/// Build the storage key for an artifact.
pub fn artifact_key(serial: &str, filename: &str) -> String {
    format!("{serial}/{filename}")
}

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
    }
}
