//! Connected peer set and frame fan-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use super::peer::{Peer, PeerId};
use crate::types::Payload;

/// Outcome of one broadcast
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Peers the payload was queued for
    pub delivered: usize,
    /// Peers skipped because they were closing
    pub skipped_closed: usize,
    /// Peers whose queue rejected the payload
    pub dropped_full: usize,
}

impl BroadcastReport {
    /// Peers considered for this broadcast
    pub fn total(&self) -> usize {
        self.delivered + self.skipped_closed + self.dropped_full
    }
}

/// The set of connected subscribers.
///
/// The lock is only held to mutate the map or to clone a snapshot of it; broadcasting walks the
/// snapshot, so no peer is ever touched while the lock is held.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<PeerId, Arc<Peer>>>,
    next_id: AtomicU64,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id for a new connection
    pub fn next_id(&self) -> PeerId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register a peer; a peer with the same id is replaced
    pub fn insert(&self, peer: Arc<Peer>) {
        let _ = self.peers.write().insert(peer.id(), peer);
    }

    /// Unregister a peer
    pub fn remove(&self, id: PeerId) -> Option<Arc<Peer>> {
        self.peers.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Clone the current peer set
    pub fn snapshot(&self) -> Vec<Arc<Peer>> {
        self.peers.read().values().cloned().collect()
    }

    /// Offer a payload to every open peer.
    ///
    /// Never fails and never waits: a closing peer is skipped and a full queue drops the payload
    /// for that peer only. Peers are not removed here; they leave through their connection task.
    pub fn broadcast(&self, payload: Payload) -> BroadcastReport {
        let peers = self.snapshot();
        let mut report = BroadcastReport::default();
        if peers.is_empty() {
            trace!("No peers connected, payload discarded");
            return report;
        }

        let len = payload.len();
        let format = payload.format();
        let message = Message::from(payload);

        for peer in &peers {
            if !peer.is_open() {
                report.skipped_closed += 1;
                continue;
            }

            match peer.offer(message.clone()) {
                Ok(()) => report.delivered += 1,
                // Closed between the check and the offer
                Err(_) if !peer.is_open() => report.skipped_closed += 1,
                Err(e) => {
                    report.dropped_full += 1;
                    if peer.drop_count().is_power_of_two() {
                        warn!(
                            peer = peer.id(),
                            dropped = peer.drop_count(),
                            error = %e,
                            "Peer falling behind"
                        );
                    } else {
                        debug!(peer = peer.id(), error = %e, "Frame dropped for peer");
                    }
                }
            }
        }

        trace!(
            len,
            %format,
            delivered = report.delivered,
            skipped = report.skipped_closed,
            dropped = report.dropped_full,
            "Broadcast complete"
        );
        report
    }

    /// Ask every peer to close
    pub fn close_all(&self) {
        for peer in self.snapshot() {
            peer.close();
        }
    }
}
