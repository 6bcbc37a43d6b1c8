//! HTTP request handlers.

pub mod common;
pub mod devices;
pub mod handshakes;
pub mod system;

pub use common::*;
pub use devices::*;
pub use handshakes::*;
pub use system::*;
