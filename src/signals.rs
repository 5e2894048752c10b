//! Signal watcher - child reaping and graceful termination.
//!
//! On POSIX the watcher subscribes to SIGCHLD (forwarded to the supervisor
//! for a non-blocking reap and a pid/status log line) and to
//! SIGTERM/SIGINT/SIGHUP, which enter the supervisor's graceful shutdown
//! path. On Windows only the ctrl-c termination path exists; child reaping
//! is handled by the runtime's process integration.

use tokio::sync::mpsc;

use crate::error::Result;
use crate::supervisor::Event;

/// Spawn the signal watcher task.
#[cfg(unix)]
pub fn spawn_watcher(events: mpsc::Sender<Event>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut child = signal(SignalKind::child())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut hangup = signal(SignalKind::hangup())?;

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                received = child.recv() => match received {
                    Some(()) => Event::ChildSignal,
                    None => return,
                },
                received = terminate.recv() => match received {
                    Some(()) => Event::Terminate,
                    None => return,
                },
                received = interrupt.recv() => match received {
                    Some(()) => Event::Terminate,
                    None => return,
                },
                received = hangup.recv() => match received {
                    Some(()) => Event::Terminate,
                    None => return,
                },
            };

            if events.send(event).await.is_err() {
                return;
            }
        }
    });

    Ok(())
}

/// Spawn the signal watcher task.
#[cfg(windows)]
pub fn spawn_watcher(events: mpsc::Sender<Event>) -> Result<()> {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            if events.send(Event::Terminate).await.is_err() {
                return;
            }
        }
    });

    Ok(())
}
