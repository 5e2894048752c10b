//! Transport module - platform-specific local endpoint handling.
//!
//! Provides abstraction over:
//! - Unix Domain Sockets (Linux/macOS)
//! - Loopback TCP (Windows)

mod local;

pub use local::{LocalListener, LocalStream};
