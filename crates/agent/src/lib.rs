//! On-device agent for the pwnhub fleet hub.
//!
//! Resolves a stable device identity from hardware signals, registers with
//! the hub and keeps the registration fresh with periodic heartbeats.

pub mod client;
pub mod config;
pub mod heartbeat;
pub mod identity;

pub use client::{HubClient, HubError, HubResult};
pub use config::{AgentConfig, IdentitySources};
pub use heartbeat::{Agent, count_captures};
pub use identity::{IdentityResolver, IdentitySnapshot, ResolvedIdentity};
