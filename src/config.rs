//! Wrapper configuration.
//!
//! Configuration is a plain struct with deployment defaults. An optional JSON
//! file (the sole command-line argument) overrides individual fields; absent
//! fields keep their defaults.
//!
//! # Example
//!
//! ```
//! use outpost_wrapper::config::WrapperConfig;
//!
//! let config = WrapperConfig::default();
//! assert_eq!(config.backend_arg, ".");
//! ```

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Configuration for one wrapper instance.
///
/// Exactly one backend child is spawned per instance; the three front
/// endpoints are all bound at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WrapperConfig {
    /// Path of the backend executable.
    pub backend_path: String,
    /// Single argument passed to the backend.
    pub backend_arg: String,
    /// TCP address the WebSocket front listens on.
    pub websocket_addr: SocketAddr,
    /// Local endpoint of the control front (socket path on POSIX,
    /// loopback `host:port` on Windows).
    pub control_endpoint: String,
    /// Local endpoint of the REPL front.
    pub repl_endpoint: String,
    /// Depth of the supervisor event queue.
    pub event_queue_depth: usize,
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self {
            backend_path: "dist/bin/backend".to_string(),
            backend_arg: ".".to_string(),
            websocket_addr: ([0, 0, 0, 0], 8888).into(),
            control_endpoint: default_control_endpoint(),
            repl_endpoint: default_repl_endpoint(),
            event_queue_depth: 1024,
        }
    }
}

#[cfg(unix)]
fn default_control_endpoint() -> String {
    "control".to_string()
}

#[cfg(unix)]
fn default_repl_endpoint() -> String {
    "repl".to_string()
}

#[cfg(windows)]
fn default_control_endpoint() -> String {
    "127.0.0.1:8890".to_string()
}

#[cfg(windows)]
fn default_repl_endpoint() -> String {
    "127.0.0.1:8891".to_string()
}

impl WrapperConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WrapperConfig::default();
        assert_eq!(config.backend_path, "dist/bin/backend");
        assert_eq!(config.backend_arg, ".");
        assert_eq!(config.websocket_addr.port(), 8888);
        assert_eq!(config.event_queue_depth, 1024);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: WrapperConfig =
            serde_json::from_str(r#"{"backend_path": "/opt/backend"}"#).unwrap();
        assert_eq!(config.backend_path, "/opt/backend");
        assert_eq!(config.backend_arg, ".");
        assert_eq!(config.websocket_addr.port(), 8888);
    }

    #[test]
    fn test_full_json_roundtrip() {
        let config = WrapperConfig {
            backend_path: "backend".into(),
            backend_arg: "data".into(),
            websocket_addr: ([127, 0, 0, 1], 9999).into(),
            control_endpoint: "ctl".into(),
            repl_endpoint: "rpl".into(),
            event_queue_depth: 16,
        };
        let text = serde_json::to_string(&config).unwrap();
        let parsed: WrapperConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.backend_path, config.backend_path);
        assert_eq!(parsed.websocket_addr, config.websocket_addr);
        assert_eq!(parsed.event_queue_depth, 16);
    }
}
