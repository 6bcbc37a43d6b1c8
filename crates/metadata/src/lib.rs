//! Device and artifact metadata store for the pwnhub hub.
//!
//! This crate owns the relational side of the hub:
//! - Device records keyed by serial, with full-replace registration and
//!   sparse heartbeat updates
//! - Artifact records, inserted together with the device counter bump
//! - Recounting a device's cached `handshake_count` from its artifacts

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::{ArtifactRow, DeviceRow, NewArtifact};
pub use repos::{ArtifactRepo, DeviceRepo};
pub use store::{MetadataStore, SqliteStore};

use pwnhub_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite {
            path,
            busy_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *busy_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
