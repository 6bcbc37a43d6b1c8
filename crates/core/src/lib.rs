//! Core domain types and shared logic for the pwnhub fleet hub.
//!
//! This crate defines the data model shared by the hub and its agents:
//! - Wire types for registration, heartbeats and uploads
//! - Sparse-update patches for heartbeat fields
//! - Serial validation and artifact filename generation
//! - Content hashing and timestamp encoding
//! - Hub configuration

pub mod api;
pub mod config;
pub mod error;
pub mod filename;
pub mod hash;
pub mod patch;
pub mod serial;
pub mod timestamp;

pub use api::{
    ArtifactList, ArtifactRecord, DeviceRecord, HeartbeatRequest, RegisterRequest, UploadResponse,
};
pub use error::{Error, Result};
pub use filename::{DEFAULT_ARTIFACT_NAME, artifact_filename, with_collision_suffix};
pub use hash::{ContentHash, ContentHasher};
pub use patch::Patch;
pub use serial::{MAX_SERIAL_LEN, validate_serial};

/// Default chunk size for streamed artifact writes: 64 KiB
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;
