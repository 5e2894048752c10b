//! Front modules - the three inbound transports.
//!
//! Provides:
//! - [`websocket`] - binary WebSocket clients on a TCP port
//! - [`control`] - administrative line commands on a local endpoint
//! - [`repl`] - cookie-correlated code fragments on a local endpoint

pub mod control;
pub mod repl;
pub mod websocket;

pub use control::ControlCommand;
pub use repl::{CommandScanner, ReplFront};
pub use websocket::{WebSocketFront, WsOutbound};
