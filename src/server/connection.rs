//! Per-subscriber connection task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, frame::coding::CloseCode};
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use super::heartbeat::{HeartbeatResult, run_heartbeat};
use super::peer::Peer;
use super::registry::PeerRegistry;
use crate::RelayError;

/// Budget for the opening handshake
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Budget for sending the close frame and flushing
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Everything a connection task needs from the server
#[derive(Clone)]
pub(crate) struct PeerContext {
    pub registry: Arc<PeerRegistry>,
    pub shutdown: CancellationToken,
    pub tracker: TaskTracker,
    pub queue_capacity: usize,
    pub ping_interval: Duration,
    pub idle_timeout: Duration,
}

/// Why a connection task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// Server is stopping
    Shutdown,
    /// Closed from our side (idle timeout)
    Evicted,
    /// Subscriber sent a close frame
    ClientClosed,
    /// Stream ended or failed
    Disconnected,
}

impl Exit {
    /// Close frame we owe the subscriber, if any
    fn close_frame(self) -> Option<CloseFrame> {
        match self {
            Exit::Shutdown => Some(CloseFrame {
                code: CloseCode::Normal,
                reason: Utf8Bytes::from_static("relay stopping"),
            }),
            Exit::Evicted => Some(CloseFrame {
                code: CloseCode::Away,
                reason: Utf8Bytes::from_static("idle timeout"),
            }),
            Exit::ClientClosed | Exit::Disconnected => None,
        }
    }
}

/// Drive one subscriber from handshake to close.
///
/// The peer is registered only after the handshake completes and is always unregistered before
/// this returns. Outbound frames come from the peer's queue and pings are written ahead of them;
/// inbound frames only refresh liveness.
pub(crate) async fn serve_peer(stream: TcpStream, addr: SocketAddr, ctx: PeerContext) {
    let ws = match time::timeout(HANDSHAKE_TIMEOUT, tokio_tungstenite::accept_async(stream)).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            debug!(%addr, error = %RelayError::from(e), "WebSocket handshake failed");
            return;
        }
        Err(_) => {
            debug!(%addr, "WebSocket handshake timed out");
            return;
        }
    };

    let (mut sink, mut inbound) = ws.split();
    let (tx, mut rx) = mpsc::channel(ctx.queue_capacity.max(1));
    let peer = Arc::new(Peer::new(ctx.registry.next_id(), addr, tx, ctx.shutdown.child_token()));
    let id = peer.id();

    ctx.registry.insert(Arc::clone(&peer));
    info!(peer = id, %addr, peers = ctx.registry.len(), "Subscriber connected");

    let hb_peer = Arc::clone(&peer);
    let (ping_interval, idle_timeout) = (ctx.ping_interval, ctx.idle_timeout);
    let _ = ctx.tracker.spawn(async move {
        if run_heartbeat(Arc::clone(&hb_peer), ping_interval, idle_timeout).await
            == HeartbeatResult::TimedOut
        {
            info!(peer = hb_peer.id(), ?idle_timeout, "Subscriber idle, closing");
            hb_peer.close();
        }
    });

    let closed_by_us = || if ctx.shutdown.is_cancelled() { Exit::Shutdown } else { Exit::Evicted };

    let exit = loop {
        let outbound = tokio::select! {
            biased;

            () = peer.closing() => break closed_by_us(),

            () = peer.ping_requested() => Message::Ping(Bytes::new()),

            queued = rx.recv() => match queued {
                Some(message) => message,
                None => break Exit::Disconnected,
            },

            frame = inbound.next() => match frame {
                Some(Ok(Message::Close(frame))) => {
                    debug!(peer = id, ?frame, "Subscriber sent close");
                    break Exit::ClientClosed;
                }
                Some(Ok(_)) => {
                    peer.mark_alive();
                    continue;
                }
                Some(Err(e)) => {
                    debug!(peer = id, error = %RelayError::from(e), "Receive failed");
                    break Exit::Disconnected;
                }
                None => break Exit::Disconnected,
            },
        };

        let sent = tokio::select! {
            result = sink.send(outbound) => result,
            () = peer.closing() => break closed_by_us(),
        };
        if let Err(e) = sent {
            debug!(peer = id, error = %RelayError::from(e), "Send failed");
            break Exit::Disconnected;
        }
    };

    peer.close();
    let _ = ctx.registry.remove(id);

    if exit != Exit::Disconnected {
        let frame = exit.close_frame();
        let _ = time::timeout(CLOSE_TIMEOUT, async {
            if let Some(frame) = frame {
                let _ = sink.send(Message::Close(Some(frame))).await;
            }
            let _ = sink.close().await;
        })
        .await;
    }

    info!(
        peer = id,
        addr = %peer.addr(),
        ?exit,
        dropped = peer.drop_count(),
        connected_for = ?peer.age(),
        peers = ctx.registry.len(),
        "Subscriber disconnected"
    );
}
