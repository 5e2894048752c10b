//! # outpost-wrapper
//!
//! Front-end wrapper for a single long-lived backend worker process.
//!
//! The wrapper terminates three inbound transports (binary WebSocket, a
//! line-oriented control channel, and a line/block-oriented REPL channel)
//! and multiplexes them over one framed byte pipe to a child process it
//! spawns and supervises.
//!
//! ## Architecture
//!
//! ```text
//! WebSocket clients ──┐
//! Control clients   ──┼─► Supervisor ─► BackendChannel ─► child stdin
//! REPL clients      ──┤       ▲                              │
//! Signal watcher    ──┘       └────────── read task ◄── child stdout
//! ```
//!
//! Everything runs on a single-threaded event loop: connection tasks are
//! pure I/O pumps feeding one event queue, and the [`supervisor::Supervisor`]
//! drains that queue, owning all mutable state. Hot restarts suspend the
//! backend channel, buffer outbound frames, and replay them onto the
//! re-spawned child's pipe in order.

pub mod backend;
pub mod config;
pub mod error;
pub mod front;
pub mod protocol;
pub mod signals;
pub mod supervisor;
pub mod transport;

pub use config::WrapperConfig;
pub use error::{Result, WrapperError};
pub use supervisor::{Event, Mode, Supervisor};
