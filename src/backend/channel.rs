//! Framed bidirectional transport to the backend child, with a suspend queue.
//!
//! The channel owns the write end of the child's stdin pipe and a read task
//! pumping the child's stdout. Writes go out as one scatter/gather operation
//! per frame (header + payload); while suspended they are deflected into a
//! FIFO pending queue instead, and `resume()` replays the queue in order.
//!
//! A channel instance is replaced, not reused, across a backend restart: the
//! supervisor drains the pending queue of the old instance into the new one
//! before resuming.

use std::collections::VecDeque;
use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::spawn::{BackendIo, Launcher};
use crate::config::WrapperConfig;
use crate::error::{Result, WrapperError};
use crate::protocol::{FrameBuffer, Header, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::supervisor::Event;

/// Pending-queue depth past which a stalled restart gets a warning.
const PENDING_WARN_THRESHOLD: usize = 1024;

/// Framed channel to the backend child.
pub struct BackendChannel {
    writer: Box<dyn AsyncWrite + Unpin + Send>,
    child: Option<tokio::process::Child>,
    suspended: bool,
    pending: VecDeque<(u16, Bytes)>,
    read_task: JoinHandle<()>,
}

impl BackendChannel {
    /// Launch the backend and start pumping its stdout.
    pub fn start(
        launcher: &mut dyn Launcher,
        config: &WrapperConfig,
        events: mpsc::Sender<Event>,
    ) -> Result<Self> {
        let io = launcher.launch(config)?;
        Ok(Self::attach(io, events))
    }

    /// Attach to already-created pipe endpoints and start the read loop.
    pub fn attach(io: BackendIo, events: mpsc::Sender<Event>) -> Self {
        let read_task = tokio::spawn(read_loop(io.reader, events));

        Self {
            writer: io.writer,
            child: io.child,
            suspended: false,
            pending: VecDeque::new(),
            read_task,
        }
    }

    /// Write one frame to the backend.
    ///
    /// While suspended, the frame is appended to the pending queue instead
    /// and is replayed in FIFO order by `resume()`.
    pub async fn write(&mut self, client_id: u16, payload: Bytes) -> Result<()> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(WrapperError::Protocol(format!(
                "payload size {} exceeds maximum {}",
                payload.len(),
                MAX_PAYLOAD_SIZE
            )));
        }

        if self.suspended {
            self.pending.push_back((client_id, payload));
            if self.pending.len() == PENDING_WARN_THRESHOLD {
                tracing::warn!(
                    frames = self.pending.len(),
                    "backend suspend queue is growing; restart may be stalled"
                );
            }
            return Ok(());
        }

        let header = Header::new(client_id, payload.len() as u16);
        write_frame(&mut self.writer, &header, &payload).await
    }

    /// Deflect subsequent writes into the pending queue.
    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    /// Stop deflecting and replay the pending queue in FIFO order.
    pub async fn resume(&mut self) -> Result<()> {
        self.suspended = false;
        while let Some((client_id, payload)) = self.pending.pop_front() {
            self.write(client_id, payload).await?;
        }
        Ok(())
    }

    /// Check whether the channel is currently suspended.
    #[inline]
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Take the pending queue for transfer to a replacement channel.
    pub fn take_pending(&mut self) -> VecDeque<(u16, Bytes)> {
        std::mem::take(&mut self.pending)
    }

    /// Adopt a predecessor's pending queue; the channel starts suspended so
    /// the queue replays only on the following `resume()`.
    pub fn adopt_pending(&mut self, pending: VecDeque<(u16, Bytes)>) {
        self.pending = pending;
        self.suspended = true;
    }

    /// Non-blocking reap of the child, if it has exited.
    ///
    /// Returns the pid and exit status on success.
    pub fn try_reap(&mut self) -> Option<(u32, std::process::ExitStatus)> {
        let child = self.child.as_mut()?;
        let pid = child.id()?;
        match child.try_wait() {
            Ok(Some(status)) => {
                self.child = None;
                Some((pid, status))
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("failed to reap backend child: {e}");
                None
            }
        }
    }
}

impl Drop for BackendChannel {
    fn drop(&mut self) {
        self.read_task.abort();
    }
}

/// Read loop: pull bytes off the child's stdout, reassemble frames, and
/// dispatch them to the supervisor.
///
/// EOF and read errors each produce a final event and end the loop; the
/// supervisor decides whether that means restart, clean shutdown, or abort.
async fn read_loop<R: AsyncRead + Unpin>(mut reader: R, events: mpsc::Sender<Event>) {
    let mut frame_buffer = FrameBuffer::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                let _ = events.send(Event::BackendClosed).await;
                return;
            }
            Ok(n) => {
                for frame in frame_buffer.push(&buf[..n]) {
                    if events.send(Event::BackendFrame(frame)).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                let _ = events.send(Event::BackendReadError(e)).await;
                return;
            }
        }
    }
}

/// Write one frame as a single logical scatter/gather operation.
///
/// The fast path covers the whole frame with one `write_vectored` call;
/// partial writes continue from the right offset until the frame is out.
async fn write_frame<W>(writer: &mut W, header: &Header, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let header_bytes = header.encode();
    let total = HEADER_SIZE + payload.len();
    let mut written = 0usize;

    while written < total {
        let n = if written < HEADER_SIZE {
            let slices = [
                IoSlice::new(&header_bytes[written..]),
                IoSlice::new(payload),
            ];
            writer.write_vectored(&slices).await?
        } else {
            writer.write(&payload[written - HEADER_SIZE..]).await?
        };

        if n == 0 {
            return Err(WrapperError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write to backend returned 0",
            )));
        }
        written += n;
    }

    writer.flush().await?;
    Ok(())
}
