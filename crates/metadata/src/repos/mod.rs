//! Repository traits for metadata operations.

pub mod artifacts;
pub mod devices;

pub use artifacts::ArtifactRepo;
pub use devices::DeviceRepo;
