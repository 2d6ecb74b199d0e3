//! Per-connection session lifecycle
//!
//! One accepted socket becomes one session: the reader task (this module's
//! entry point), a writer task that is the only code ever touching the write
//! half, and an idle watchdog. The reader owns teardown; the other two
//! report in over one-shot channels, and the close guard on the session
//! handle keeps teardown from running twice.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use natter_protocol::{messages, Envelope, LineCodec};

use crate::broadcaster::Broadcaster;
use crate::config::SessionConfig;
use crate::handlers::HandlerContext;
use crate::registry::{Registry, SessionHandle};
use crate::watchdog::IdleWatchdog;

/// Why a session ended, for the close log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer closed its side of the connection
    PeerClosed,
    /// Reading from the socket failed
    ReadFailed,
    /// The idle watchdog expired
    IdleTimeout,
    /// The writer task stopped on a socket error
    WriteFailed,
    /// The shared broadcast queue is gone
    ServerClosing,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PeerClosed => "peer closed",
            Self::ReadFailed => "read failed",
            Self::IdleTimeout => "idle timeout",
            Self::WriteFailed => "write failed",
            Self::ServerClosing => "server closing",
        })
    }
}

/// Drive one connection from accept to close
///
/// Runs as its own task. Registration, the join announcement, the command
/// loop and teardown all happen here; the writer and the watchdog are
/// spawned helpers this task outlives.
pub async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<Registry>,
    broadcaster: Broadcaster,
    config: SessionConfig,
) {
    let addr = peer.to_string();
    let (mailbox_tx, mailbox_rx) = mpsc::channel(config.mailbox_capacity);
    let handle = Arc::new(SessionHandle::new(addr.clone(), mailbox_tx));

    if let Err(e) = registry.insert(Arc::clone(&handle)) {
        // Someone renamed themselves to this exact address string; the
        // newcomer loses and never enters the room
        warn!(peer = %addr, error = %e, "refusing connection, identity occupied");
        return;
    }

    info!(peer = %addr, online = registry.len(), "session opened");

    let (read_half, write_half) = stream.into_split();
    let reader = FramedRead::new(
        read_half,
        LineCodec::with_max_line_bytes(config.max_line_bytes),
    );
    // Rendered lines wrap a full-length body in an address and name prefix,
    // so the write side gets headroom beyond the read cap
    let writer = FramedWrite::new(
        write_half,
        LineCodec::with_max_line_bytes(config.max_line_bytes * 2 + 64),
    );

    let (write_failed_tx, write_failed_rx) = oneshot::channel();
    let writer_task = tokio::spawn(drain_mailbox(writer, mailbox_rx, write_failed_tx));

    let (watchdog, expired_rx) = IdleWatchdog::spawn(
        Arc::clone(&handle),
        Duration::from_secs(config.idle_timeout_secs),
    );

    // The join announcement rides the normal fan-out path, so the newcomer
    // sees their own arrival like everyone else
    let joined = Envelope::render(&addr, &handle.identity(), messages::ONLINE_BODY);
    if broadcaster.publish(joined).await.is_err() {
        debug!(peer = %addr, "join announcement skipped, broadcast queue closed");
    }

    let ctx = HandlerContext::new(
        Arc::clone(&registry),
        broadcaster.clone(),
        Arc::clone(&handle),
    );
    let reason = read_loop(&addr, reader, ctx, watchdog, expired_rx, write_failed_rx).await;

    if handle.begin_close() {
        let identity = handle.identity();
        registry.remove(&identity);
        info!(peer = %addr, reason = %reason, online = registry.len(), "session closed");

        // Announced after removal, so the leaver is not in the fan-out
        // snapshot for their own departure
        let left = Envelope::render(&addr, &identity, messages::OFFLINE_BODY);
        if broadcaster.publish(left).await.is_err() {
            debug!(peer = %addr, "departure announcement skipped, broadcast queue closed");
        }
    }

    // Dropping the handle releases the last long-lived mailbox sender; the
    // writer drains whatever is still queued, flushes and closes the socket
    drop(handle);
    if let Err(e) = writer_task.await {
        error!(peer = %addr, error = %e, "writer task panicked");
    }
}

/// Pump inbound lines through the interpreter until something ends the session
async fn read_loop(
    addr: &str,
    mut reader: FramedRead<OwnedReadHalf, LineCodec>,
    ctx: HandlerContext,
    watchdog: IdleWatchdog,
    mut expired: oneshot::Receiver<()>,
    mut write_failed: oneshot::Receiver<()>,
) -> DisconnectReason {
    loop {
        tokio::select! {
            frame = reader.next() => match frame {
                Some(Ok(line)) => {
                    if let Err(e) = ctx.route_line(&line).await {
                        error!(peer = %addr, error = %e, "command failed, closing session");
                        return DisconnectReason::ServerClosing;
                    }
                    watchdog.touch();
                }
                Some(Err(e)) => {
                    debug!(peer = %addr, error = %e, "read failed");
                    return DisconnectReason::ReadFailed;
                }
                None => return DisconnectReason::PeerClosed,
            },
            _ = &mut expired => return DisconnectReason::IdleTimeout,
            _ = &mut write_failed => return DisconnectReason::WriteFailed,
        }
    }
}

/// Sole writer for one session's socket
///
/// Lines arrive from the mailbox in order. A write error reports back to
/// the reader and abandons the rest; a closed mailbox is normal teardown,
/// drained to the last line before the socket shuts down.
async fn drain_mailbox(
    mut sink: FramedWrite<OwnedWriteHalf, LineCodec>,
    mut mailbox: mpsc::Receiver<String>,
    write_failed: oneshot::Sender<()>,
) {
    while let Some(line) = mailbox.recv().await {
        if let Err(e) = sink.send(line).await {
            debug!(error = %e, "write failed, abandoning session output");
            let _ = write_failed.send(());
            return;
        }
    }
    if let Err(e) = SinkExt::<String>::close(&mut sink).await {
        debug!(error = %e, "socket close reported an error");
    }
}
