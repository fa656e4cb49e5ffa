//! Subscriber connection state.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::{RelayError, Result};

/// Identifier assigned to each accepted connection
pub type PeerId = u64;

/// A connected WebSocket subscriber.
///
/// Holds the sending half of the peer's bounded outbound queue. The connection task owns the
/// socket and drains the queue; nothing here performs I/O, so offering a frame never blocks.
/// Pings bypass the queue, so a subscriber whose queue is full is still pinged.
pub struct Peer {
    id: PeerId,
    addr: SocketAddr,
    /// Outbound queue to the connection task.
    tx: mpsc::Sender<Message>,
    /// Cleared once the connection starts closing.
    open: AtomicBool,
    connected_at: Instant,
    /// Last inbound frame of any kind.
    last_seen: Mutex<Instant>,
    /// Frames dropped because the queue was full.
    dropped: AtomicU64,
    /// Cancelled to make the connection task close the socket.
    closer: CancellationToken,
    /// Pending ping for the connection task, coalesced.
    ping: Notify,
}

impl Peer {
    /// Create peer state for a freshly accepted connection.
    pub fn new(
        id: PeerId,
        addr: SocketAddr,
        tx: mpsc::Sender<Message>,
        closer: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            addr,
            tx,
            open: AtomicBool::new(true),
            connected_at: now,
            last_seen: Mutex::new(now),
            dropped: AtomicU64::new(0),
            closer,
            ping: Notify::new(),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether frames offered now can still reach the subscriber.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Queue a message without waiting.
    ///
    /// A full queue drops the message and counts it; the peer stays registered.
    pub fn offer(&self, message: Message) -> Result<()> {
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(RelayError::peer_send_failed(self.id, "outbound queue full"))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(RelayError::peer_send_failed(self.id, "connection closed"))
            }
        }
    }

    /// Ask the connection task to send a ping ahead of any queued frames.
    ///
    /// Requests made before the task gets to the first one collapse into a single ping.
    pub fn request_ping(&self) {
        self.ping.notify_one();
    }

    /// Resolves when a ping has been requested.
    pub async fn ping_requested(&self) {
        self.ping.notified().await;
    }

    /// Record a liveness signal from the subscriber.
    pub fn mark_alive(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last liveness signal (or since connecting).
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Ask the connection task to close the socket.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
        self.closer.cancel();
    }

    /// Resolves once the peer is asked to close, or the server shuts down.
    pub async fn closing(&self) {
        self.closer.cancelled().await;
    }

    /// Total frames dropped for this peer.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("open", &self.is_open())
            .field("dropped", &self.drop_count())
            .finish()
    }
}
