//! HTTP hub for pwnhub agents.
//!
//! This crate provides:
//! - Device registration and heartbeat endpoints
//! - Streamed capture uploads with SHA-256 digests
//! - Capture listing and download
//! - The retention engine and its background scheduler
//! - SSH key provisioning through an external script

pub mod artifacts;
pub mod error;
pub mod handlers;
pub mod locks;
pub mod metrics;
pub mod provision;
pub mod retention;
pub mod routes;
pub mod state;

pub use artifacts::ArtifactStore;
pub use error::ApiError;
pub use locks::DeviceLocks;
pub use retention::{RetentionEngine, RetentionError, RetentionStats};
pub use routes::create_router;
pub use state::AppState;
