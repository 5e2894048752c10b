//! REPL front - multi-line code fragments correlated by 16-bit cookies.
//!
//! Inbound text is framed per client by [`CommandScanner`]:
//! - **Single-line form**: everything up to a newline is one command.
//! - **Block form**: a buffer beginning with exactly `{\n` is scanned for a
//!   line consisting of exactly `}`; the command body runs from the byte
//!   after the opening `{\n` through the closing `}` inclusive.
//!
//! Each command is tagged with a wrapping 16-bit cookie and forwarded to the
//! backend as a `REPL_COMMAND`; `REPL_RESULT` replies are routed back to the
//! submitting client by cookie, prefixed with their own 2-byte length.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::{Result, WrapperError};
use crate::protocol::{opcode, MAX_PAYLOAD_SIZE};
use crate::supervisor::Event;
use crate::transport::{LocalListener, LocalStream};

use super::websocket::MAX_ACCEPT_ERRORS;

/// Bytes prepended to a command body on the backend pipe:
/// opcode, cookie, and body length (u16 LE each).
pub const COMMAND_OVERHEAD: usize = 6;

/// Largest command body that still fits in one backend frame.
pub const MAX_COMMAND_LEN: usize = MAX_PAYLOAD_SIZE - COMMAND_OVERHEAD;

/// A client buffer this large without a complete command closes the client.
const MAX_BUFFER_LEN: usize = u16::MAX as usize;

/// Reply queue depth per REPL client.
const REPLY_QUEUE_DEPTH: usize = 16;

/// Commands extracted from one read, plus whether the leftover buffer has
/// outgrown the cap.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Complete command bodies, in arrival order.
    pub commands: Vec<Bytes>,
    /// True when the residual buffer is at or past the cap.
    pub overflow: bool,
}

/// Per-client line/block framing buffer.
#[derive(Debug, Default)]
pub struct CommandScanner {
    buf: BytesMut,
}

impl CommandScanner {
    /// Create an empty scanner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes and extract as many complete commands as possible.
    ///
    /// Usually there will be at most one command in the buffer.
    pub fn push(&mut self, data: &[u8]) -> ScanOutcome {
        self.buf.extend_from_slice(data);

        let mut commands = Vec::new();
        while let Some(command) = self.try_extract_one() {
            commands.push(command);
        }

        ScanOutcome {
            commands,
            overflow: self.buf.len() >= MAX_BUFFER_LEN,
        }
    }

    fn try_extract_one(&mut self) -> Option<Bytes> {
        let eol = find_newline(&self.buf, 0)?;

        if eol == 1 && self.buf[0] == b'{' {
            // Look for a line containing only a closing brace.
            let mut prev = eol;
            loop {
                let next = find_newline(&self.buf, prev + 1)?;
                if next - prev == 2 && self.buf[next - 1] == b'}' {
                    // Consume through the newline after the brace; the body
                    // keeps the brace but not that newline.
                    let block = self.buf.split_to(next + 1).freeze();
                    return Some(block.slice(2..next));
                }
                prev = next;
            }
        }

        let mut line = self.buf.split_to(eol + 1);
        line.truncate(eol);
        Some(line.freeze())
    }
}

fn find_newline(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .iter()
        .position(|&b| b == b'\n')
        .map(|pos| from + pos)
}

/// Cookie allocator and reply router for the REPL front.
///
/// Owned by the supervisor task; all mutation happens on the event loop.
pub struct ReplFront {
    next_cookie: u16,
    pending: HashMap<u16, u64>,
    clients: HashMap<u64, mpsc::Sender<Bytes>>,
}

impl ReplFront {
    /// Create an empty front.
    pub fn new() -> Self {
        Self {
            next_cookie: 0,
            pending: HashMap::new(),
            clients: HashMap::new(),
        }
    }

    /// Register a connected REPL client.
    pub fn open(&mut self, client: u64, sender: mpsc::Sender<Bytes>) {
        self.clients.insert(client, sender);
    }

    /// Drop a disconnected client. Its pending entries are discarded lazily
    /// when their replies arrive.
    pub fn closed(&mut self, client: u64) {
        self.clients.remove(&client);
    }

    /// Encode one command body as a `REPL_COMMAND` payload, recording the
    /// cookie before the caller sends the frame.
    ///
    /// Cookie wrap-around is permitted; a wrapped cookie that is somehow
    /// still outstanding silently overwrites the stale entry.
    pub fn encode_command(&mut self, client: u64, body: &[u8]) -> Option<Bytes> {
        if body.len() > MAX_COMMAND_LEN {
            tracing::error!(client, len = body.len(), "repl command too long; dropped");
            return None;
        }

        let cookie = self.next_cookie;
        self.next_cookie = self.next_cookie.wrapping_add(1);
        self.pending.insert(cookie, client);

        let mut buf = BytesMut::with_capacity(COMMAND_OVERHEAD + body.len());
        buf.put_u16_le(opcode::REPL_COMMAND);
        buf.put_u16_le(cookie);
        buf.put_u16_le(body.len() as u16);
        buf.extend_from_slice(body);
        Some(buf.freeze())
    }

    /// Route a `REPL_RESULT` payload (opcode already stripped) back to the
    /// submitting client.
    ///
    /// Reply shape: `{cookie: u16 LE, inner_len: u16 LE, inner_bytes...}`.
    /// The forward to the client keeps the 2-byte length prefix.
    pub fn handle_response(&mut self, reply: Bytes) {
        if reply.len() < 2 {
            tracing::warn!("repl reply has no cookie");
            return;
        }
        let cookie = u16::from_le_bytes([reply[0], reply[1]]);

        let Some(client) = self.pending.remove(&cookie) else {
            tracing::warn!(cookie, "repl reply has invalid cookie");
            return;
        };

        if reply.len() < 4 {
            tracing::warn!(cookie, "repl reply has no length prefix");
            return;
        }
        let inner_len = u16::from_le_bytes([reply[2], reply[3]]) as usize;
        if inner_len > reply.len() - 4 {
            tracing::warn!(
                cookie,
                inner_len,
                available = reply.len() - 4,
                "repl reply length exceeds payload"
            );
            return;
        }

        let Some(sender) = self.clients.get(&client) else {
            tracing::warn!(cookie, client, "repl reply refers to missing client");
            return;
        };

        let forward = reply.slice(2..4 + inner_len);
        if let Err(e) = sender.try_send(forward) {
            tracing::warn!(client, "error writing to repl client: {e}");
            self.clients.remove(&client);
        }
    }

    /// Number of replies still outstanding.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Default for ReplFront {
    fn default() -> Self {
        Self::new()
    }
}

/// Accept loop for the REPL front.
///
/// The error counter resets on success; five consecutive accept failures end
/// the loop with an error.
pub async fn accept_loop(listener: LocalListener, events: mpsc::Sender<Event>) -> Result<()> {
    let mut errors = 0u32;
    let mut next_client = 0u64;

    loop {
        match listener.accept().await {
            Ok(stream) => {
                errors = 0;
                let client = next_client;
                next_client += 1;
                tokio::spawn(run_client(stream, client, events.clone()));
            }
            Err(e) => {
                tracing::error!("error accepting repl client: {e}");
                errors += 1;
                if errors >= MAX_ACCEPT_ERRORS {
                    return Err(WrapperError::AcceptLimit("repl"));
                }
            }
        }
    }
}

/// Pump one REPL client: scan inbound commands, write back replies.
async fn run_client(stream: LocalStream, client: u64, events: mpsc::Sender<Event>) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (sender, mut replies) = mpsc::channel::<Bytes>(REPLY_QUEUE_DEPTH);

    if events.send(Event::ReplOpen { client, sender }).await.is_err() {
        return;
    }

    let mut scanner = CommandScanner::new();
    let mut chunk = [0u8; 1024];

    'session: loop {
        tokio::select! {
            read = reader.read(&mut chunk) => match read {
                Ok(0) => break 'session,
                Ok(n) => {
                    let outcome = scanner.push(&chunk[..n]);
                    for body in outcome.commands {
                        if body.len() > MAX_COMMAND_LEN {
                            tracing::error!(
                                "repl client {client} disconnected: message too long"
                            );
                            break 'session;
                        }
                        let sent = events.send(Event::ReplCommand { client, body }).await;
                        if sent.is_err() {
                            return;
                        }
                    }
                    if outcome.overflow {
                        tracing::error!("repl client {client} disconnected: message too long");
                        break 'session;
                    }
                }
                Err(e) => {
                    tracing::error!("repl client {client} disconnected: {e}");
                    break 'session;
                }
            },
            reply = replies.recv() => match reply {
                Some(bytes) => {
                    if let Err(e) = writer.write_all(&bytes).await {
                        tracing::error!("error writing to repl client {client}: {e}");
                        break 'session;
                    }
                }
                None => break 'session, // supervisor dropped us
            },
        }
    }

    let _ = events.send(Event::ReplClosed { client }).await;
}
