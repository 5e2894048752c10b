//! Control front - administrative line commands on a local endpoint.
//!
//! Commands are exact literal lines; anything else is logged and ignored
//! while the connection stays open. No response bytes are ever sent; the
//! effect of a command is observed out-of-band.

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::error::{Result, WrapperError};
use crate::protocol::opcode;
use crate::supervisor::Event;
use crate::transport::{LocalListener, LocalStream};

use super::websocket::MAX_ACCEPT_ERRORS;

/// Per-client buffer cap; exceeding it disconnects the client.
const MAX_BUFFER_LEN: usize = 128;

/// Administrative command accepted on the control front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Orderly shutdown of backend and wrapper.
    Shutdown,
    /// Hot-restart, server side.
    RestartServer,
    /// Hot-restart, client side.
    RestartClient,
    /// Hot-restart, both sides.
    RestartBoth,
}

impl ControlCommand {
    /// Parse a single text line (without its trailing newline).
    pub fn parse(line: &[u8]) -> Option<Self> {
        match line {
            b"shutdown" => Some(Self::Shutdown),
            b"restart_server" => Some(Self::RestartServer),
            b"restart_client" => Some(Self::RestartClient),
            b"restart_both" => Some(Self::RestartBoth),
            _ => None,
        }
    }

    /// Opcode sent to the backend for this command.
    pub fn opcode(self) -> u16 {
        match self {
            Self::Shutdown => opcode::SHUTDOWN,
            Self::RestartServer => opcode::RESTART_SERVER,
            Self::RestartClient => opcode::RESTART_CLIENT,
            Self::RestartBoth => opcode::RESTART_BOTH,
        }
    }

    /// Whether this command triggers the suspend/replay restart cycle.
    pub fn is_restart(self) -> bool {
        matches!(
            self,
            Self::RestartServer | Self::RestartClient | Self::RestartBoth
        )
    }
}

/// Accept loop for the control front.
///
/// Shares the accept-error discipline with the REPL front: the counter
/// resets on success and the fifth consecutive failure is fatal.
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
                tracing::error!("error accepting control client: {e}");
                errors += 1;
                if errors >= MAX_ACCEPT_ERRORS {
                    return Err(WrapperError::AcceptLimit("control"));
                }
            }
        }
    }
}

/// Read lines from one control client until it disconnects.
async fn run_client(mut stream: LocalStream, client: u64, events: mpsc::Sender<Event>) {
    let mut buf = BytesMut::new();
    let mut chunk = [0u8; 128];

    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) => {
                tracing::error!("control client {client} disconnected: {e}");
                return;
            }
        };
        buf.extend_from_slice(&chunk[..n]);

        while let Some(eol) = buf.iter().position(|&b| b == b'\n') {
            let mut line = buf.split_to(eol + 1);
            line.truncate(eol);

            match ControlCommand::parse(&line) {
                Some(command) => {
                    if events.send(Event::Control(command)).await.is_err() {
                        return;
                    }
                }
                None => {
                    tracing::warn!(
                        client,
                        "unknown control command: {}",
                        String::from_utf8_lossy(&line)
                    );
                }
            }
        }

        if buf.len() >= MAX_BUFFER_LEN {
            tracing::error!("control client {client} disconnected: message too long");
            return;
        }
    }
}
