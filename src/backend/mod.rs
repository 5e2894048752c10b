//! Backend module - the framed channel to the supervised child process.
//!
//! Provides:
//! - [`BackendChannel`] - framed reads/writes with suspend/resume
//! - [`Launcher`]/[`ChildLauncher`] - child spawn plumbing

mod channel;
mod spawn;

pub use channel::BackendChannel;
pub use spawn::{BackendIo, ChildLauncher, Launcher};
