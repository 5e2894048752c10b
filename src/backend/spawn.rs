//! Backend child spawn plumbing.
//!
//! The backend child reads framed messages on stdin and writes framed
//! messages to stdout. `tokio::process` provides the platform mechanics the
//! wrapper needs on both families: anonymous pipes wired to the child's
//! stdio on POSIX, overlapped pipes on Windows.
//!
//! The [`Launcher`] trait is the seam between the supervisor and the OS:
//! production uses [`ChildLauncher`], tests substitute in-memory duplex
//! pipes.

use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

use crate::config::WrapperConfig;
use crate::error::{Result, WrapperError};

/// The pipe endpoints (and child handle) produced by a launch.
pub struct BackendIo {
    /// Child process handle, if a real process was spawned.
    pub child: Option<Child>,
    /// Read end: the child's stdout.
    pub reader: Box<dyn AsyncRead + Unpin + Send>,
    /// Write end: the child's stdin.
    pub writer: Box<dyn AsyncWrite + Unpin + Send>,
}

/// Spawns (or simulates) the backend child process.
pub trait Launcher: Send {
    /// Launch one backend instance and hand back its pipe endpoints.
    fn launch(&mut self, config: &WrapperConfig) -> Result<BackendIo>;
}

/// Production launcher: spawns `backend_path backend_arg` with piped stdio.
///
/// Stderr is inherited so backend diagnostics land next to the wrapper's.
pub struct ChildLauncher;

impl Launcher for ChildLauncher {
    fn launch(&mut self, config: &WrapperConfig) -> Result<BackendIo> {
        let mut child = Command::new(&config.backend_path)
            .arg(&config.backend_arg)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| WrapperError::Spawn {
                path: config.backend_path.clone(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WrapperError::Protocol("backend stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WrapperError::Protocol("backend stdout was not captured".to_string()))?;

        tracing::info!(
            pid = child.id(),
            path = %config.backend_path,
            "spawned backend child"
        );

        Ok(BackendIo {
            child: Some(child),
            reader: Box::new(stdout),
            writer: Box::new(stdin),
        })
    }
}
