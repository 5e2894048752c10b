//! Platform-specific local stream endpoint.
//!
//! The control and REPL fronts listen on a local stream endpoint:
//! - Unix: Unix Domain Socket at a filesystem path
//! - Windows: loopback TCP, the endpoint string is a `host:port` address
//!
//! # Example
//!
//! ```ignore
//! use outpost_wrapper::transport::LocalListener;
//!
//! let listener = LocalListener::bind("control").await?;
//! let stream = listener.accept().await?;
//! ```

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

// ============================================================================
// Unix Implementation
// ============================================================================

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use std::path::Path;
    use tokio::net::{UnixListener, UnixStream};

    /// Unix Domain Socket listener.
    pub struct LocalListener {
        listener: UnixListener,
        path: String,
    }

    /// Unix Domain Socket stream (connected).
    pub struct LocalStream {
        stream: UnixStream,
    }

    impl LocalListener {
        /// Bind to a Unix socket path.
        ///
        /// Removes any existing socket file at the path before binding.
        pub async fn bind(endpoint: &str) -> Result<Self> {
            if Path::new(endpoint).exists() {
                std::fs::remove_file(endpoint)?;
            }

            let listener = UnixListener::bind(endpoint)?;

            Ok(Self {
                listener,
                path: endpoint.to_string(),
            })
        }

        /// Accept a single connection.
        pub async fn accept(&self) -> Result<LocalStream> {
            let (stream, _addr) = self.listener.accept().await?;
            Ok(LocalStream { stream })
        }

        /// Get the socket path.
        pub fn endpoint(&self) -> &str {
            &self.path
        }
    }

    impl Drop for LocalListener {
        fn drop(&mut self) {
            // Clean up socket file when listener is dropped
            let _ = std::fs::remove_file(&self.path);
        }
    }

    impl AsyncRead for LocalStream {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.stream).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for LocalStream {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::pin::Pin::new(&mut self.stream).poll_write(cx, buf)
        }

        fn poll_flush(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.stream).poll_flush(cx)
        }

        fn poll_shutdown(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.stream).poll_shutdown(cx)
        }
    }

    impl LocalStream {
        /// Connect to a local endpoint (used by tests and tooling).
        pub async fn connect(endpoint: &str) -> Result<Self> {
            let stream = UnixStream::connect(endpoint).await?;
            Ok(Self { stream })
        }
    }
}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(windows)]
mod windows_impl {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    /// Loopback TCP listener standing in for the Unix socket.
    pub struct LocalListener {
        listener: TcpListener,
        endpoint: String,
    }

    /// Loopback TCP stream (connected).
    pub struct LocalStream {
        stream: TcpStream,
    }

    impl LocalListener {
        /// Bind to a loopback `host:port` endpoint.
        pub async fn bind(endpoint: &str) -> Result<Self> {
            let listener = TcpListener::bind(endpoint).await?;
            Ok(Self {
                listener,
                endpoint: endpoint.to_string(),
            })
        }

        /// Accept a single connection.
        pub async fn accept(&self) -> Result<LocalStream> {
            let (stream, _addr) = self.listener.accept().await?;
            Ok(LocalStream { stream })
        }

        /// Get the endpoint string.
        pub fn endpoint(&self) -> &str {
            &self.endpoint
        }
    }

    impl LocalStream {
        /// Connect to a local endpoint (used by tests and tooling).
        pub async fn connect(endpoint: &str) -> Result<Self> {
            let stream = TcpStream::connect(endpoint).await?;
            Ok(Self { stream })
        }
    }

    impl AsyncRead for LocalStream {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.stream).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for LocalStream {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::pin::Pin::new(&mut self.stream).poll_write(cx, buf)
        }

        fn poll_flush(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.stream).poll_flush(cx)
        }

        fn poll_shutdown(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.stream).poll_shutdown(cx)
        }
    }
}

// ============================================================================
// Platform-independent re-exports
// ============================================================================

#[cfg(unix)]
pub use unix_impl::{LocalListener, LocalStream};

#[cfg(windows)]
pub use windows_impl::{LocalListener, LocalStream};
