//! Application state shared across handlers.

use crate::artifacts::ArtifactStore;
use crate::locks::DeviceLocks;
use crate::provision::Provisioner;
use crate::retention::RetentionEngine;
use pwnhub_core::config::AppConfig;
use pwnhub_metadata::MetadataStore;
use pwnhub_storage::ObjectStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<AppConfig>,
    /// Capture file storage.
    pub storage: Arc<dyn ObjectStore>,
    /// Device and artifact records.
    pub metadata: Arc<dyn MetadataStore>,
    /// Upload pipeline.
    pub artifacts: ArtifactStore,
    /// Retention engine, shared with the background scheduler.
    pub retention: Arc<RetentionEngine>,
    /// SSH key provisioning.
    pub provisioner: Provisioner,
    /// Per-device locks used by uploads.
    pub locks: DeviceLocks,
    /// Fires on server shutdown; background work and retention passes
    /// stop at their next safe point.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire the services together over the given backends.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let locks = DeviceLocks::new();
        let artifacts = ArtifactStore::new(metadata.clone(), storage.clone(), locks.clone());
        let retention = Arc::new(RetentionEngine::new(
            metadata.clone(),
            storage.clone(),
            config.retention.clone(),
        ));
        let provisioner = Provisioner::new(config.provision.clone());

        Self {
            config: Arc::new(config),
            storage,
            metadata,
            artifacts,
            retention,
            provisioner,
            locks,
            shutdown: CancellationToken::new(),
        }
    }
}
