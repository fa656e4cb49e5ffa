//! Ping keepalive and idle detection.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tracing::trace;

use super::peer::Peer;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// Nothing arrived from the subscriber within the idle timeout.
    TimedOut,
    /// The peer or the server is shutting down.
    Cancelled,
}

/// Keep a peer alive and detect lost connections.
///
/// Every `interval` a ping is requested from the connection task, which writes it straight to the
/// socket instead of the frame queue. Any inbound frame refreshes the peer's liveness, so a pong,
/// a ping or data all count. Once the peer has been silent for at least `idle_timeout` the loop
/// returns [`HeartbeatResult::TimedOut`]. The loop ends with [`HeartbeatResult::Cancelled`] as
/// soon as the peer starts closing.
pub async fn run_heartbeat(
    peer: Arc<Peer>,
    interval: Duration,
    idle_timeout: Duration,
) -> HeartbeatResult {
    let tick = interval.min(idle_timeout).max(Duration::from_millis(1));
    let mut ticker = time::interval_at(time::Instant::now() + tick, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut since_ping = Duration::ZERO;

    loop {
        tokio::select! {
            () = peer.closing() => return HeartbeatResult::Cancelled,
            _ = ticker.tick() => {
                if peer.idle_for() >= idle_timeout {
                    return HeartbeatResult::TimedOut;
                }

                since_ping += tick;
                if since_ping >= interval {
                    since_ping = Duration::ZERO;
                    peer.request_ping();
                    trace!(peer = peer.id(), "Ping requested");
                }
            }
        }
    }
}
