//! WebSocket fan-out server
//!
//! Accepts subscribers on a loopback TCP listener and pushes every broadcast payload to each
//! connected peer. Each peer gets its own connection task and bounded queue, so one slow or dying
//! subscriber never delays the others or the receive loop.

mod connection;
pub mod heartbeat;
pub mod peer;
pub mod registry;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::WebSocketConfig;
use crate::types::Payload;
use crate::{RelayError, Result};
use connection::{PeerContext, serve_peer};

pub use heartbeat::HeartbeatResult;
pub use peer::{Peer, PeerId};
pub use registry::{BroadcastReport, PeerRegistry};

/// Longest pause between accept retries
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Running WebSocket server
///
/// Dropping the server cancels all of its tasks without waiting for them.
#[derive(Debug)]
pub struct BroadcastServer {
    registry: Arc<PeerRegistry>,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl BroadcastServer {
    /// Bind the listener and start accepting subscribers
    pub async fn bind(config: &WebSocketConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind)
            .await
            .map_err(|source| RelayError::Bind { addr: config.bind, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| RelayError::Bind { addr: config.bind, source })?;

        let registry = Arc::new(PeerRegistry::new());
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        let ctx = PeerContext {
            registry: Arc::clone(&registry),
            shutdown: cancel.clone(),
            tracker: tracker.clone(),
            queue_capacity: config.peer_queue_capacity,
            ping_interval: config.ping_interval(),
            idle_timeout: config.idle_timeout(),
        };
        let _ = tracker.spawn(accept_loop(listener, ctx));

        info!(%local_addr, "WebSocket server listening");
        Ok(Self { registry, local_addr, cancel, tracker })
    }

    /// Address the listener is bound to (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Offer a payload to every connected subscriber
    pub fn broadcast(&self, payload: Payload) -> BroadcastReport {
        self.registry.broadcast(payload)
    }

    /// Shared peer registry
    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn peer_count(&self) -> usize {
        self.registry.len()
    }

    /// Stop accepting, close every peer and wait for all tasks within `grace`
    pub async fn shutdown(&self, grace: Duration) -> Result<()> {
        debug!(peers = self.registry.len(), ?grace, "Stopping WebSocket server");
        self.cancel.cancel();
        self.registry.close_all();
        self.tracker.close();

        match time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => {
                info!(addr = %self.local_addr, "WebSocket server stopped");
                Ok(())
            }
            Err(_) => {
                warn!(
                    remaining = self.tracker.len(),
                    "WebSocket tasks still running after grace period"
                );
                Err(RelayError::Timeout { duration: grace })
            }
        }
    }
}

impl Drop for BroadcastServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(listener: TcpListener, ctx: PeerContext) {
    let mut failures: u32 = 0;

    loop {
        let accepted = tokio::select! {
            biased;
            () = ctx.shutdown.cancelled() => break,
            result = listener.accept() => result,
        };

        match accepted {
            Ok((stream, addr)) => {
                failures = 0;
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(%addr, error = %e, "Failed to set TCP_NODELAY");
                }
                let _ = ctx.tracker.spawn(serve_peer(stream, addr, ctx.clone()));
            }
            Err(e) => {
                // Usually fd exhaustion; back off instead of spinning
                failures = failures.saturating_add(1);
                let backoff = Duration::from_millis(10 << failures.min(7)).min(MAX_ACCEPT_BACKOFF);
                warn!(error = %e, failures, ?backoff, "Accept failed");
                tokio::select! {
                    () = ctx.shutdown.cancelled() => break,
                    () = time::sleep(backoff) => {}
                }
            }
        }
    }

    debug!("Accept loop stopped");
}
