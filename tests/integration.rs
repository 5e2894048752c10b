//! Integration tests for outpost-wrapper.
//!
//! Each scenario drives a full supervisor over in-memory duplex pipes
//! standing in for the backend child's stdin/stdout, asserting the literal
//! bytes the wrapper puts on (and takes off) the backend pipe.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

use outpost_wrapper::backend::{BackendIo, Launcher};
use outpost_wrapper::front::control::ControlCommand;
use outpost_wrapper::front::repl::CommandScanner;
use outpost_wrapper::front::websocket::WsOutbound;
use outpost_wrapper::protocol::{Header, HEADER_SIZE};
use outpost_wrapper::{Event, Result, Supervisor, WrapperConfig};

/// The far (backend-side) ends of one launched instance's pipes.
struct BackendEnd {
    /// Reads what the wrapper wrote to the child's stdin.
    stdin: DuplexStream,
    /// Writes what the child would put on stdout.
    stdout: DuplexStream,
}

/// Launcher that hands out pre-built duplex pipe pairs.
struct QueueLauncher {
    ios: VecDeque<BackendIo>,
}

impl QueueLauncher {
    fn with_instances(n: usize) -> (Self, VecDeque<BackendEnd>) {
        let mut ios = VecDeque::new();
        let mut ends = VecDeque::new();
        for _ in 0..n {
            let (to_backend, stdin) = tokio::io::duplex(256 * 1024);
            let (stdout, from_backend) = tokio::io::duplex(256 * 1024);
            ios.push_back(BackendIo {
                child: None,
                reader: Box::new(from_backend),
                writer: Box::new(to_backend),
            });
            ends.push_back(BackendEnd { stdin, stdout });
        }
        (Self { ios }, ends)
    }
}

impl Launcher for QueueLauncher {
    fn launch(&mut self, _config: &WrapperConfig) -> Result<BackendIo> {
        Ok(self.ios.pop_front().expect("no backend instance prepared"))
    }
}

/// Start a supervisor over `n` prepared backend instances.
///
/// Fronts are not bound; events are injected directly through the sender,
/// which is exactly what the front tasks would do.
fn start_supervisor(
    n: usize,
) -> (
    tokio::task::JoinHandle<Result<()>>,
    mpsc::Sender<Event>,
    VecDeque<BackendEnd>,
) {
    let (launcher, ends) = QueueLauncher::with_instances(n);
    let supervisor =
        Supervisor::new(WrapperConfig::default(), Box::new(launcher)).expect("supervisor");
    let events = supervisor.event_sender();
    let run = tokio::spawn(supervisor.run());
    (run, events, ends)
}

async fn read_frame(stdin: &mut DuplexStream) -> (u16, Vec<u8>) {
    let mut header = [0u8; HEADER_SIZE];
    timeout(Duration::from_secs(1), stdin.read_exact(&mut header))
        .await
        .expect("timed out reading frame header")
        .expect("read frame header");
    let header = Header::decode(&header).expect("decode header");
    let mut payload = vec![0u8; header.data_len as usize];
    timeout(Duration::from_secs(1), stdin.read_exact(&mut payload))
        .await
        .expect("timed out reading frame payload")
        .expect("read frame payload");
    (header.client_id, payload)
}

async fn assert_pipe_idle(stdin: &mut DuplexStream) {
    let mut probe = [0u8; 1];
    let read = timeout(Duration::from_millis(50), stdin.read(&mut probe)).await;
    match read {
        Err(_) => {}       // nothing buffered
        Ok(Ok(0)) => {}    // wrapper side closed with nothing buffered
        Ok(other) => panic!("unexpected bytes on backend pipe: {other:?}"),
    }
}

async fn write_backend_frame(stdout: &mut DuplexStream, client_id: u16, payload: &[u8]) {
    let header = Header::new(client_id, payload.len() as u16);
    let bytes = outpost_wrapper::protocol::build_frame(&header, payload);
    stdout.write_all(&bytes).await.expect("write backend frame");
    stdout.flush().await.expect("flush backend frame");
}

/// S1: a control `shutdown` line becomes exactly one SHUTDOWN frame, and the
/// backend's subsequent EOF exits the wrapper cleanly.
#[tokio::test]
async fn s1_control_shutdown_frames_and_clean_exit() {
    let (run, events, mut ends) = start_supervisor(1);
    let mut backend = ends.pop_front().unwrap();

    events
        .send(Event::Control(ControlCommand::Shutdown))
        .await
        .unwrap();

    let mut frame = [0u8; 6];
    timeout(Duration::from_secs(1), backend.stdin.read_exact(&mut frame))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame, [0x00, 0x00, 0x02, 0x00, 0x05, 0xff]);
    assert_pipe_idle(&mut backend.stdin).await;

    // Backend exits in response; the wrapper shuts down with status 0.
    drop(backend.stdout);
    let result = timeout(Duration::from_secs(1), run).await.unwrap().unwrap();
    assert!(result.is_ok());
}

/// S2: the first two WebSocket connections get ids 1 and 2, each announced
/// with an ADD_CLIENT frame.
#[tokio::test]
async fn s2_websocket_connects_get_sequential_ids() {
    let (_run, events, mut ends) = start_supervisor(1);
    let mut backend = ends.pop_front().unwrap();

    let (tx1, _rx1) = mpsc::channel::<WsOutbound>(8);
    let (tx2, _rx2) = mpsc::channel::<WsOutbound>(8);
    events
        .send(Event::WsOpen {
            handle: 10,
            sender: tx1,
        })
        .await
        .unwrap();
    events
        .send(Event::WsOpen {
            handle: 11,
            sender: tx2,
        })
        .await
        .unwrap();

    let (id, payload) = read_frame(&mut backend.stdin).await;
    assert_eq!(id, 0);
    assert_eq!(payload, [0x00, 0xff, 0x01, 0x00]);

    let (id, payload) = read_frame(&mut backend.stdin).await;
    assert_eq!(id, 0);
    assert_eq!(payload, [0x00, 0xff, 0x02, 0x00]);
}

/// S3: a REPL line becomes a cookie-tagged REPL_COMMAND, and the reply comes
/// back to the submitting client with its length prefix.
#[tokio::test]
async fn s3_repl_command_roundtrip() {
    let (_run, events, mut ends) = start_supervisor(1);
    let mut backend = ends.pop_front().unwrap();

    let (reply_tx, mut replies) = mpsc::channel::<Bytes>(8);
    events
        .send(Event::ReplOpen {
            client: 0,
            sender: reply_tx,
        })
        .await
        .unwrap();
    events
        .send(Event::ReplCommand {
            client: 0,
            body: Bytes::from_static(b"1+1"),
        })
        .await
        .unwrap();

    let (id, payload) = read_frame(&mut backend.stdin).await;
    assert_eq!(id, 0);
    assert_eq!(payload.len(), 9);
    assert_eq!(&payload[..2], &[0x03, 0xff]);
    let cookie = [payload[2], payload[3]];
    assert_eq!(&payload[4..6], &[0x03, 0x00]);
    assert_eq!(&payload[6..], b"1+1");

    // Backend replies on client 0 with REPL_RESULT {cookie, len, "2\n"}.
    let reply = [
        &[0x04, 0xff][..],
        &cookie[..],
        &[0x02, 0x00, 0x32, 0x0a][..],
    ]
    .concat();
    write_backend_frame(&mut backend.stdout, 0, &reply).await;

    let forwarded = timeout(Duration::from_secs(1), replies.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&forwarded[..], &[0x02, 0x00, 0x32, 0x0a]);
}

/// Property 3: two concurrent REPL commands answered in reverse order each
/// reach their own client.
#[tokio::test]
async fn repl_correlation_with_reversed_replies() {
    let (_run, events, mut ends) = start_supervisor(1);
    let mut backend = ends.pop_front().unwrap();

    let (tx_a, mut rx_a) = mpsc::channel::<Bytes>(8);
    let (tx_b, mut rx_b) = mpsc::channel::<Bytes>(8);
    events.send(Event::ReplOpen { client: 0, sender: tx_a }).await.unwrap();
    events.send(Event::ReplOpen { client: 1, sender: tx_b }).await.unwrap();

    events
        .send(Event::ReplCommand {
            client: 0,
            body: Bytes::from_static(b"a"),
        })
        .await
        .unwrap();
    events
        .send(Event::ReplCommand {
            client: 1,
            body: Bytes::from_static(b"b"),
        })
        .await
        .unwrap();

    let (_, first) = read_frame(&mut backend.stdin).await;
    let (_, second) = read_frame(&mut backend.stdin).await;
    let cookie_a = [first[2], first[3]];
    let cookie_b = [second[2], second[3]];

    let reply_b = [&[0x04, 0xff][..], &cookie_b[..], &[0x01, 0x00, b'B'][..]].concat();
    let reply_a = [&[0x04, 0xff][..], &cookie_a[..], &[0x01, 0x00, b'A'][..]].concat();
    write_backend_frame(&mut backend.stdout, 0, &reply_b).await;
    write_backend_frame(&mut backend.stdout, 0, &reply_a).await;

    let to_a = timeout(Duration::from_secs(1), rx_a.recv()).await.unwrap().unwrap();
    let to_b = timeout(Duration::from_secs(1), rx_b.recv()).await.unwrap().unwrap();
    assert_eq!(&to_a[..], &[0x01, 0x00, b'A']);
    assert_eq!(&to_b[..], &[0x01, 0x00, b'B']);
}

/// S4: a restart suspends the channel, queues traffic submitted while the
/// old backend drains, and replays it first on the new pipe.
#[tokio::test]
async fn s4_restart_preserves_queued_writes() {
    let (_run, events, mut ends) = start_supervisor(2);
    let mut old_backend = ends.pop_front().unwrap();
    let mut new_backend = ends.pop_front().unwrap();

    // A session exists before the restart.
    let (ws_tx, _ws_rx) = mpsc::channel::<WsOutbound>(8);
    events
        .send(Event::WsOpen {
            handle: 10,
            sender: ws_tx,
        })
        .await
        .unwrap();
    let (_, payload) = read_frame(&mut old_backend.stdin).await;
    assert_eq!(payload, [0x00, 0xff, 0x01, 0x00]);

    events
        .send(Event::Control(ControlCommand::RestartServer))
        .await
        .unwrap();
    let (id, payload) = read_frame(&mut old_backend.stdin).await;
    assert_eq!(id, 0);
    assert_eq!(payload, [0x06, 0xff]);

    // Traffic submitted while restarting is queued, not written.
    events
        .send(Event::WsMessage {
            handle: 10,
            payload: Bytes::from_static(b"abc"),
        })
        .await
        .unwrap();
    assert_pipe_idle(&mut old_backend.stdin).await;

    // Old backend exits; the wrapper re-spawns and replays the queue first.
    drop(old_backend.stdout);
    let (id, payload) = read_frame(&mut new_backend.stdin).await;
    assert_eq!(id, 1);
    assert_eq!(payload, b"abc");
    assert_pipe_idle(&mut new_backend.stdin).await;
}

/// S5: client disconnect followed by the backend's CLIENT_REMOVED destroys
/// the session exactly once; nothing is forwarded for that id afterwards.
#[tokio::test]
async fn s5_half_open_teardown_client_first() {
    let (run, events, mut ends) = start_supervisor(1);
    let mut backend = ends.pop_front().unwrap();

    let (ws_tx, mut ws_rx) = mpsc::channel::<WsOutbound>(8);
    events
        .send(Event::WsOpen {
            handle: 10,
            sender: ws_tx,
        })
        .await
        .unwrap();
    let (_, payload) = read_frame(&mut backend.stdin).await;
    assert_eq!(payload, [0x00, 0xff, 0x01, 0x00]);

    // Peer disconnects: the wrapper asks the backend to remove the session.
    events.send(Event::WsClosed { handle: 10 }).await.unwrap();
    let (id, payload) = read_frame(&mut backend.stdin).await;
    assert_eq!(id, 0);
    assert_eq!(payload, [0x01, 0xff, 0x01, 0x00]);

    // Backend acknowledges; the session is destroyed.
    write_backend_frame(&mut backend.stdout, 0, &[0x02, 0xff, 0x01, 0x00]).await;

    // A late backend frame for id 1 is dropped: the connection's queue is
    // gone, so recv resolves to None rather than a frame.
    write_backend_frame(&mut backend.stdout, 1, b"late").await;
    let out = timeout(Duration::from_secs(1), ws_rx.recv()).await.unwrap();
    assert!(out.is_none(), "message forwarded to a destroyed session");

    // A second close of the same handle is a no-op (no REMOVE_CLIENT).
    events.send(Event::WsClosed { handle: 10 }).await.unwrap();
    assert_pipe_idle(&mut backend.stdin).await;

    drop(backend.stdout);
    let result = timeout(Duration::from_secs(1), run).await.unwrap().unwrap();
    assert!(result.is_ok());
}

/// Backend-initiated removal first: the wrapper closes the peer connection
/// and the close event completes teardown.
#[tokio::test]
async fn half_open_teardown_backend_first() {
    let (_run, events, mut ends) = start_supervisor(1);
    let mut backend = ends.pop_front().unwrap();

    let (ws_tx, mut ws_rx) = mpsc::channel::<WsOutbound>(8);
    events
        .send(Event::WsOpen {
            handle: 10,
            sender: ws_tx,
        })
        .await
        .unwrap();
    let (_, payload) = read_frame(&mut backend.stdin).await;
    assert_eq!(payload, [0x00, 0xff, 0x01, 0x00]);

    write_backend_frame(&mut backend.stdout, 0, &[0x02, 0xff, 0x01, 0x00]).await;

    // The wrapper asks the connection to close.
    let out = timeout(Duration::from_secs(1), ws_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(out, WsOutbound::Close));

    // The resulting close event finishes teardown without another
    // REMOVE_CLIENT round-trip.
    events.send(Event::WsClosed { handle: 10 }).await.unwrap();
    assert_pipe_idle(&mut backend.stdin).await;
}

/// S6: a block submitted through the scanner arrives at the backend as one
/// REPL_COMMAND whose body keeps the closing brace.
#[tokio::test]
async fn s6_block_framing_end_to_end() {
    let (_run, events, mut ends) = start_supervisor(1);
    let mut backend = ends.pop_front().unwrap();

    let (reply_tx, _replies) = mpsc::channel::<Bytes>(8);
    events
        .send(Event::ReplOpen {
            client: 0,
            sender: reply_tx,
        })
        .await
        .unwrap();

    // What the REPL client task does with inbound bytes.
    let mut scanner = CommandScanner::new();
    let outcome = scanner.push(b"{\nprint(1)\nprint(2)\n}\n");
    assert_eq!(outcome.commands.len(), 1);
    for body in outcome.commands {
        events
            .send(Event::ReplCommand { client: 0, body })
            .await
            .unwrap();
    }

    let (id, payload) = read_frame(&mut backend.stdin).await;
    assert_eq!(id, 0);
    assert_eq!(&payload[..2], &[0x03, 0xff]);
    let body_len = u16::from_le_bytes([payload[4], payload[5]]) as usize;
    assert_eq!(&payload[6..6 + body_len], b"print(1)\nprint(2)\n}");
    assert_pipe_idle(&mut backend.stdin).await;
}

/// WebSocket payloads forwarded verbatim both directions while the session
/// is fully open.
#[tokio::test]
async fn websocket_payload_forwarding() {
    let (_run, events, mut ends) = start_supervisor(1);
    let mut backend = ends.pop_front().unwrap();

    let (ws_tx, mut ws_rx) = mpsc::channel::<WsOutbound>(8);
    events
        .send(Event::WsOpen {
            handle: 10,
            sender: ws_tx,
        })
        .await
        .unwrap();
    let _ = read_frame(&mut backend.stdin).await; // ADD_CLIENT

    events
        .send(Event::WsMessage {
            handle: 10,
            payload: Bytes::from_static(b"request"),
        })
        .await
        .unwrap();
    let (id, payload) = read_frame(&mut backend.stdin).await;
    assert_eq!(id, 1);
    assert_eq!(payload, b"request");

    write_backend_frame(&mut backend.stdout, 1, b"response").await;
    let out = timeout(Duration::from_secs(1), ws_rx.recv())
        .await
        .unwrap()
        .unwrap();
    match out {
        WsOutbound::Frame(bytes) => assert_eq!(&bytes[..], b"response"),
        other => panic!("unexpected outbound: {other:?}"),
    }
}

/// Unknown opcodes and malformed control messages from the backend are
/// ignored without disturbing the session table.
#[tokio::test]
async fn malformed_backend_control_messages_are_ignored() {
    let (run, events, mut ends) = start_supervisor(1);
    let mut backend = ends.pop_front().unwrap();

    let (ws_tx, mut ws_rx) = mpsc::channel::<WsOutbound>(8);
    events
        .send(Event::WsOpen {
            handle: 10,
            sender: ws_tx,
        })
        .await
        .unwrap();
    let _ = read_frame(&mut backend.stdin).await; // ADD_CLIENT

    // No opcode at all, unknown opcode, and a CLIENT_REMOVED of the wrong
    // length; none of them may tear the session down.
    write_backend_frame(&mut backend.stdout, 0, &[0x05]).await;
    write_backend_frame(&mut backend.stdout, 0, &[0x99, 0xff, 0x00, 0x00]).await;
    write_backend_frame(&mut backend.stdout, 0, &[0x02, 0xff, 0x01, 0x00, 0x00]).await;

    // The session still forwards.
    write_backend_frame(&mut backend.stdout, 1, b"still here").await;
    let out = timeout(Duration::from_secs(1), ws_rx.recv())
        .await
        .unwrap()
        .unwrap();
    match out {
        WsOutbound::Frame(bytes) => assert_eq!(&bytes[..], b"still here"),
        other => panic!("unexpected outbound: {other:?}"),
    }

    drop(backend.stdout);
    let result = timeout(Duration::from_secs(1), run).await.unwrap().unwrap();
    assert!(result.is_ok());
}
