//! WebSocket front - binary clients multiplexed onto 16-bit session ids.
//!
//! The listener accepts TCP connections, performs the WebSocket handshake,
//! and runs one reader and one writer task per connection. Sessions live in
//! [`WebSocketFront`], owned by the supervisor task: a forward map from
//! session id and an inverse map from connection handle, kept bijective over
//! living sessions.
//!
//! Session teardown is half-open-tolerant: either the peer or the backend
//! may close first, the surviving side is asked to close, and the session is
//! destroyed only once both sides are gone.

use std::collections::HashMap;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::{Message, WebSocketConfig};

use crate::error::{Result, WrapperError};
use crate::protocol::MAX_PAYLOAD_SIZE;
use crate::supervisor::Event;

/// Consecutive accept failures tolerated before the front is declared dead.
pub(crate) const MAX_ACCEPT_ERRORS: u32 = 5;

/// Outbound queue depth per connection.
const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Message sent to a connection's writer task.
#[derive(Debug)]
pub enum WsOutbound {
    /// Send a binary frame to the peer.
    Frame(Bytes),
    /// Initiate a close handshake.
    Close,
}

/// One side of a session being connected or already torn down.
///
/// `Both` means both the peer socket and the backend-side registration are
/// alive; the other two name the side that is still connected. A transition
/// past the last living side yields `None`: the session is dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Liveness {
    Both,
    ClientOnly,
    BackendOnly,
}

impl Liveness {
    fn client_connected(self) -> bool {
        matches!(self, Liveness::Both | Liveness::ClientOnly)
    }

    fn backend_connected(self) -> bool {
        matches!(self, Liveness::Both | Liveness::BackendOnly)
    }

    fn client_closed(self) -> Option<Self> {
        match self {
            Liveness::Both => Some(Liveness::BackendOnly),
            Liveness::BackendOnly => Some(Liveness::BackendOnly),
            Liveness::ClientOnly => None,
        }
    }

    fn backend_removed(self) -> Option<Self> {
        match self {
            Liveness::Both => Some(Liveness::ClientOnly),
            Liveness::ClientOnly => Some(Liveness::ClientOnly),
            Liveness::BackendOnly => None,
        }
    }
}

struct Session {
    handle: u64,
    liveness: Liveness,
    sender: mpsc::Sender<WsOutbound>,
}

/// Outcome of a peer-initiated close.
#[derive(Debug, PartialEq, Eq)]
pub enum Disconnect {
    /// Connection was not in the table (already torn down).
    Unknown,
    /// Both sides gone; the session was destroyed.
    Dead,
    /// Backend side still up; ask it to remove this id.
    NotifyBackend(u16),
}

/// Session table for the WebSocket front.
pub struct WebSocketFront {
    next_id: u16,
    sessions: HashMap<u16, Session>,
    handles: HashMap<u64, u16>,
}

impl WebSocketFront {
    /// Create an empty session table.
    pub fn new() -> Self {
        Self {
            next_id: 1,
            sessions: HashMap::new(),
            handles: HashMap::new(),
        }
    }

    /// Register a freshly opened connection and allocate its session id.
    ///
    /// Id allocation wraps modulo 2^16, skipping 0 and any id still in use.
    pub fn open(&mut self, handle: u64, sender: mpsc::Sender<WsOutbound>) -> u16 {
        while self.next_id == 0 || self.sessions.contains_key(&self.next_id) {
            self.next_id = self.next_id.wrapping_add(1);
        }
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        self.sessions.insert(
            id,
            Session {
                handle,
                liveness: Liveness::Both,
                sender,
            },
        );
        self.handles.insert(handle, id);
        id
    }

    /// Resolve an inbound message to its session id.
    ///
    /// Returns `None` for unknown handles and for sessions whose backend
    /// side is already gone; the caller drops the payload in both cases.
    pub fn message(&self, handle: u64) -> Option<u16> {
        let id = *self.handles.get(&handle)?;
        let session = self.sessions.get(&id)?;
        session.liveness.backend_connected().then_some(id)
    }

    /// Record a peer-initiated close.
    pub fn client_closed(&mut self, handle: u64) -> Disconnect {
        let Some(&id) = self.handles.get(&handle) else {
            return Disconnect::Unknown;
        };
        let Some(session) = self.sessions.get_mut(&id) else {
            return Disconnect::Unknown;
        };

        match session.liveness.client_closed() {
            Some(next) => {
                session.liveness = next;
                Disconnect::NotifyBackend(id)
            }
            None => {
                self.sessions.remove(&id);
                self.handles.remove(&handle);
                Disconnect::Dead
            }
        }
    }

    /// Record a backend `CLIENT_REMOVED` acknowledgment.
    ///
    /// If the peer is still connected, its connection is asked to close; the
    /// resulting close event completes teardown.
    pub fn handle_client_removed(&mut self, id: u16) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };

        match session.liveness.backend_removed() {
            Some(next) => {
                session.liveness = next;
                if let Err(e) = session.sender.try_send(WsOutbound::Close) {
                    tracing::warn!(client_id = id, "failed to request websocket close: {e}");
                }
            }
            None => {
                let handle = session.handle;
                self.sessions.remove(&id);
                self.handles.remove(&handle);
            }
        }
    }

    /// Forward a backend payload to a session's peer.
    ///
    /// Unknown ids and half-closed sessions drop silently; queue errors are
    /// logged and the session is left to be reaped by its close event.
    pub fn send(&self, id: u16, payload: Bytes) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        if !session.liveness.client_connected() {
            return;
        }
        if let Err(e) = session.sender.try_send(WsOutbound::Frame(payload)) {
            tracing::warn!(client_id = id, "error writing to websocket client: {e}");
        }
    }

    /// Number of living sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for WebSocketFront {
    fn default() -> Self {
        Self::new()
    }
}

/// Bind the WebSocket listener with address reuse enabled.
pub fn bind(addr: std::net::SocketAddr) -> Result<TcpListener> {
    let socket = match addr {
        std::net::SocketAddr::V4(_) => TcpSocket::new_v4()?,
        std::net::SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(128)?)
}

/// Accept loop for the WebSocket front.
///
/// Each accepted connection gets a fresh opaque handle and its own
/// reader/writer tasks. The error counter resets on success; five
/// consecutive accept failures end the loop with an error.
pub async fn accept_loop(listener: TcpListener, events: mpsc::Sender<Event>) -> Result<()> {
    let mut errors = 0u32;
    let mut next_handle = 1u64;

    loop {
        match listener.accept().await {
            Ok((stream, _peer)) => {
                errors = 0;
                let handle = next_handle;
                next_handle += 1;
                tokio::spawn(run_connection(stream, handle, events.clone()));
            }
            Err(e) => {
                tracing::error!("error accepting websocket client: {e}");
                errors += 1;
                if errors >= MAX_ACCEPT_ERRORS {
                    return Err(WrapperError::AcceptLimit("websocket"));
                }
            }
        }
    }
}

/// Handshake one connection and pump it until either side closes.
async fn run_connection(stream: TcpStream, handle: u64, events: mpsc::Sender<Event>) {
    let ws_config = WebSocketConfig::default()
        .max_message_size(Some(MAX_PAYLOAD_SIZE))
        .max_frame_size(Some(MAX_PAYLOAD_SIZE));

    let ws = match tokio_tungstenite::accept_async_with_config(stream, Some(ws_config)).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!("websocket handshake failed: {e}");
            return;
        }
    };

    let (mut sink, mut source) = ws.split();
    let (sender, mut outbound) = mpsc::channel::<WsOutbound>(OUTBOUND_QUEUE_DEPTH);

    if events.send(Event::WsOpen { handle, sender }).await.is_err() {
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(out) = outbound.recv().await {
            let result = match out {
                WsOutbound::Frame(payload) => sink.send(Message::Binary(payload)).await,
                WsOutbound::Close => sink.send(Message::Close(None)).await,
            };
            if let Err(e) = result {
                tracing::warn!("error writing to websocket client: {e}");
                return;
            }
        }
    });

    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Binary(payload)) => {
                let sent = events.send(Event::WsMessage { handle, payload }).await;
                if sent.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // text/ping/pong are not part of the protocol
            Err(e) => {
                tracing::warn!("websocket client error: {e}");
                break;
            }
        }
    }

    let _ = events.send(Event::WsClosed { handle }).await;
    writer.abort();
}
