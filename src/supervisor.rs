//! Supervisor - single point of routing between fronts and backend.
//!
//! All components funnel into one mpsc queue of [`Event`]s; the supervisor
//! drains it on the single-threaded runtime, so every mutation of the
//! session table, the REPL correlator, and the backend channel is
//! serialized here.
//!
//! ```text
//! WebSocket ─┐                             ┌─► child stdin
//! Control   ─┼─► mpsc::Sender<Event> ─► Supervisor ─► BackendChannel
//! REPL      ─┤                             └─◄ child stdout (read task)
//! Signals   ─┘
//! ```
//!
//! The supervisor also holds the global [`Mode`]: a restart command suspends
//! the backend channel, the backend's EOF then triggers a re-spawn, and the
//! suspended writes replay onto the new pipe with no loss or reordering.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::backend::{BackendChannel, Launcher};
use crate::config::WrapperConfig;
use crate::error::{Result, WrapperError};
use crate::front::control::ControlCommand;
use crate::front::repl::ReplFront;
use crate::front::websocket::{Disconnect, WebSocketFront, WsOutbound};
use crate::front::{control, repl, websocket};
use crate::protocol::{opcode, Frame, CONTROL_CLIENT_ID, MAX_PAYLOAD_SIZE};
use crate::signals;
use crate::transport::LocalListener;

/// Global wrapper mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Backend up, traffic flowing.
    Normal,
    /// Restart in flight: backend channel suspended, EOF awaited.
    Restarting,
}

/// Everything the supervisor reacts to.
#[derive(Debug)]
pub enum Event {
    /// A complete frame arrived from the backend.
    BackendFrame(Frame),
    /// The backend pipe reached EOF.
    BackendClosed,
    /// The backend pipe failed mid-read.
    BackendReadError(std::io::Error),
    /// A WebSocket connection finished its handshake.
    WsOpen {
        /// Opaque connection handle assigned at accept.
        handle: u64,
        /// Queue feeding the connection's writer task.
        sender: mpsc::Sender<WsOutbound>,
    },
    /// A binary frame arrived from a WebSocket peer.
    WsMessage {
        /// Connection handle.
        handle: u64,
        /// Frame payload.
        payload: Bytes,
    },
    /// A WebSocket connection closed.
    WsClosed {
        /// Connection handle.
        handle: u64,
    },
    /// A control client issued a command.
    Control(ControlCommand),
    /// A REPL client connected.
    ReplOpen {
        /// Per-front client serial.
        client: u64,
        /// Queue feeding the client's reply writes.
        sender: mpsc::Sender<Bytes>,
    },
    /// A REPL client submitted one command body.
    ReplCommand {
        /// Per-front client serial.
        client: u64,
        /// Command body (line or block).
        body: Bytes,
    },
    /// A REPL client disconnected.
    ReplClosed {
        /// Per-front client serial.
        client: u64,
    },
    /// SIGCHLD fired; a child may be waiting to be reaped.
    ChildSignal,
    /// A termination signal asked for graceful shutdown.
    Terminate,
    /// A front's accept loop died.
    FrontFatal(WrapperError),
}

/// Whether the event loop keeps running.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Shutdown,
}

/// Owns the backend channel and all front state; routes every event.
pub struct Supervisor {
    config: WrapperConfig,
    launcher: Box<dyn Launcher>,
    backend: BackendChannel,
    websocket: WebSocketFront,
    repl: ReplFront,
    mode: Mode,
    events: mpsc::Receiver<Event>,
    events_tx: mpsc::Sender<Event>,
}

impl Supervisor {
    /// Launch the backend and assemble the supervisor.
    pub fn new(config: WrapperConfig, mut launcher: Box<dyn Launcher>) -> Result<Self> {
        let (events_tx, events) = mpsc::channel(config.event_queue_depth);
        let backend = BackendChannel::start(launcher.as_mut(), &config, events_tx.clone())?;

        Ok(Self {
            config,
            launcher,
            backend,
            websocket: WebSocketFront::new(),
            repl: ReplFront::new(),
            mode: Mode::Normal,
            events,
            events_tx,
        })
    }

    /// Clone the event sender (used by fronts and tests).
    pub fn event_sender(&self) -> mpsc::Sender<Event> {
        self.events_tx.clone()
    }

    /// Bind the three front listeners and the signal watcher.
    pub async fn spawn_fronts(&self) -> Result<()> {
        let ws_listener = websocket::bind(self.config.websocket_addr)?;
        tracing::info!(addr = %self.config.websocket_addr, "websocket front listening");
        spawn_front(websocket::accept_loop(ws_listener, self.events_tx.clone()), self.events_tx.clone());

        let control_listener = LocalListener::bind(&self.config.control_endpoint).await?;
        tracing::info!(endpoint = %self.config.control_endpoint, "control front listening");
        spawn_front(control::accept_loop(control_listener, self.events_tx.clone()), self.events_tx.clone());

        let repl_listener = LocalListener::bind(&self.config.repl_endpoint).await?;
        tracing::info!(endpoint = %self.config.repl_endpoint, "repl front listening");
        spawn_front(repl::accept_loop(repl_listener, self.events_tx.clone()), self.events_tx.clone());

        signals::spawn_watcher(self.events_tx.clone())?;
        Ok(())
    }

    /// Drain events until clean shutdown or a fatal error.
    pub async fn run(mut self) -> Result<()> {
        while let Some(event) = self.events.recv().await {
            if self.handle_event(event).await? == Flow::Shutdown {
                return Ok(());
            }
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: Event) -> Result<Flow> {
        match event {
            Event::BackendFrame(frame) => {
                self.handle_backend_response(frame)?;
            }
            Event::BackendClosed => {
                return self.handle_backend_shutdown().await;
            }
            Event::BackendReadError(e) => {
                tracing::error!("error reading from backend: {e}");
                return Err(WrapperError::Io(e));
            }
            Event::WsOpen { handle, sender } => {
                let id = self.websocket.open(handle, sender);
                self.backend
                    .write(CONTROL_CLIENT_ID, client_opcode_payload(opcode::ADD_CLIENT, id))
                    .await
                    .map_err(fatal_backend_write)?;
            }
            Event::WsMessage { handle, payload } => {
                if payload.len() > MAX_PAYLOAD_SIZE {
                    tracing::warn!(len = payload.len(), "oversized websocket message dropped");
                    return Ok(Flow::Continue);
                }
                if let Some(id) = self.websocket.message(handle) {
                    self.backend
                        .write(id, payload)
                        .await
                        .map_err(fatal_backend_write)?;
                }
            }
            Event::WsClosed { handle } => {
                if let Disconnect::NotifyBackend(id) = self.websocket.client_closed(handle) {
                    self.backend
                        .write(
                            CONTROL_CLIENT_ID,
                            client_opcode_payload(opcode::REMOVE_CLIENT, id),
                        )
                        .await
                        .map_err(fatal_backend_write)?;
                }
            }
            Event::Control(command) => {
                self.handle_control_command(command).await?;
            }
            Event::ReplOpen { client, sender } => {
                self.repl.open(client, sender);
            }
            Event::ReplCommand { client, body } => {
                if let Some(encoded) = self.repl.encode_command(client, &body) {
                    self.backend
                        .write(CONTROL_CLIENT_ID, encoded)
                        .await
                        .map_err(fatal_backend_write)?;
                }
            }
            Event::ReplClosed { client } => {
                self.repl.closed(client);
            }
            Event::ChildSignal => {
                if let Some((pid, status)) = self.backend.try_reap() {
                    tracing::info!("child {pid} exited with status {status}");
                }
            }
            Event::Terminate => {
                tracing::info!("termination signal received; shutting down backend");
                self.backend
                    .write(CONTROL_CLIENT_ID, opcode_payload(opcode::SHUTDOWN))
                    .await
                    .map_err(fatal_backend_write)?;
            }
            Event::FrontFatal(e) => {
                return Err(e);
            }
        }
        Ok(Flow::Continue)
    }

    /// Route one backend frame: opcode dispatch on client 0, session
    /// forwarding otherwise.
    fn handle_backend_response(&mut self, frame: Frame) -> Result<()> {
        if frame.client_id() != CONTROL_CLIENT_ID {
            self.websocket.send(frame.client_id(), frame.payload);
            return Ok(());
        }

        let Some(op) = frame.opcode() else {
            tracing::warn!("control message from backend has no opcode");
            return Ok(());
        };

        match op {
            opcode::CLIENT_REMOVED => {
                if frame.payload_len() != 4 {
                    tracing::warn!(
                        len = frame.payload_len(),
                        "CLIENT_REMOVED with unexpected length"
                    );
                    return Ok(());
                }
                let id = u16::from_le_bytes([frame.payload[2], frame.payload[3]]);
                self.websocket.handle_client_removed(id);
            }
            opcode::REPL_RESULT => {
                self.repl.handle_response(frame.payload.slice(2..));
            }
            other => {
                tracing::warn!(opcode = other, "unknown opcode from backend");
            }
        }
        Ok(())
    }

    /// Write a control opcode to the backend; restart commands additionally
    /// suspend the channel and flip the mode.
    async fn handle_control_command(&mut self, command: ControlCommand) -> Result<()> {
        self.backend
            .write(CONTROL_CLIENT_ID, opcode_payload(command.opcode()))
            .await
            .map_err(fatal_backend_write)?;

        if command.is_restart() {
            self.mode = Mode::Restarting;
            self.backend.suspend();
        }
        Ok(())
    }

    /// Backend pipe EOF: re-spawn when restarting, exit cleanly otherwise.
    async fn handle_backend_shutdown(&mut self) -> Result<Flow> {
        if self.mode != Mode::Restarting {
            tracing::info!("backend closed its pipe; shutting down");
            return Ok(Flow::Shutdown);
        }

        tracing::info!("backend closed its pipe; restarting");
        let pending = self.backend.take_pending();
        let mut backend =
            BackendChannel::start(self.launcher.as_mut(), &self.config, self.events_tx.clone())?;
        backend.adopt_pending(pending);
        self.backend = backend;
        self.mode = Mode::Normal;
        self.backend.resume().await.map_err(fatal_backend_write)?;
        Ok(Flow::Continue)
    }
}

/// A failed backend write is fatal; the backend is the only mission-critical
/// peer.
fn fatal_backend_write(e: WrapperError) -> WrapperError {
    tracing::error!("error writing to backend: {e}");
    e
}

fn opcode_payload(op: u16) -> Bytes {
    Bytes::copy_from_slice(&op.to_le_bytes())
}

fn client_opcode_payload(op: u16, client_id: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u16_le(op);
    buf.put_u16_le(client_id);
    buf.freeze()
}

/// Run a front accept loop, converting its terminal error into an event.
fn spawn_front<F>(future: F, events: mpsc::Sender<Event>)
where
    F: std::future::Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = future.await {
            let _ = events.send(Event::FrontFatal(e)).await;
        }
    });
}
