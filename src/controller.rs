//! Relay lifecycle
//!
//! [`RelayController`] owns one configured relay: the WebSocket server plus the receive loop that
//! feeds it. Both halves start together and stop together; the current state is observable as a
//! value and as a stream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{error, info, warn};

use crate::config::RelayConfig;
use crate::receiver::{LoopExit, ReceiveLoop, ReceiveStats, StatsSnapshot};
use crate::server::BroadcastServer;
use crate::source::DatagramSource;
use crate::sources::{ChannelSource, DatagramSender, UdpSource};
use crate::{RelayError, Result};

/// Lifecycle state of a relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayState {
    Stopped,
    Running,
    /// The receive loop hit an unrecoverable error; `stop()` reports it
    Failed,
}

/// Addresses a started relay is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayEndpoints {
    pub udp: SocketAddr,
    pub websocket: SocketAddr,
}

struct RunningRelay {
    server: BroadcastServer,
    cancel: CancellationToken,
    receiver: JoinHandle<Result<LoopExit>>,
    /// Stops the receive loop if the controller is dropped while running
    _guard: DropGuard,
}

/// Start/stop handle for one relay
pub struct RelayController {
    config: RelayConfig,
    running: Mutex<Option<RunningRelay>>,
    state: watch::Sender<RelayState>,
    stats: Arc<ReceiveStats>,
}

impl RelayController {
    pub fn new(config: RelayConfig) -> Self {
        let (state, _) = watch::channel(RelayState::Stopped);
        Self { config, running: Mutex::new(None), state, stats: Arc::new(ReceiveStats::default()) }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Bind both sockets and start relaying datagrams from UDP.
    ///
    /// Fails with [`RelayError::AlreadyRunning`] if the relay is running. If either socket cannot
    /// be bound nothing is left running.
    pub async fn start(&self) -> Result<RelayEndpoints> {
        let mut running = self.running.lock().await;
        self.ensure_startable(&mut running).await?;

        let server = BroadcastServer::bind(&self.config.websocket).await?;
        let source = match UdpSource::bind(&self.config.udp) {
            Ok(source) => source,
            Err(e) => {
                if let Err(shutdown_err) = server.shutdown(self.config.shutdown_grace()).await {
                    warn!(error = %shutdown_err, "WebSocket server did not stop cleanly");
                }
                return Err(e);
            }
        };

        let endpoints = RelayEndpoints { udp: source.local_addr(), websocket: server.local_addr() };
        *running = Some(self.launch(source, server));

        info!(udp = %endpoints.udp, websocket = %endpoints.websocket, "Relay started");
        Ok(endpoints)
    }

    /// Start relaying datagrams pushed from inside this process.
    ///
    /// Returns the producer handle and the WebSocket address. The channel holds at most
    /// `capacity` pending datagrams; [`DatagramSender::try_push`] drops when it is full.
    pub async fn start_with_channel(
        &self,
        capacity: usize,
    ) -> Result<(DatagramSender, SocketAddr)> {
        let mut running = self.running.lock().await;
        self.ensure_startable(&mut running).await?;

        let server = BroadcastServer::bind(&self.config.websocket).await?;
        let websocket = server.local_addr();
        let (sender, source) = ChannelSource::bounded(capacity);
        *running = Some(self.launch(source, server));

        info!(%websocket, capacity, "Relay started with in-process source");
        Ok((sender, websocket))
    }

    /// Stop the receive loop, then the server, within the configured grace period.
    ///
    /// Returns the receive loop's error if it failed while running, otherwise any shutdown error.
    /// Fails with [`RelayError::NotRunning`] if there is nothing to stop.
    pub async fn stop(&self) -> Result<()> {
        let relay = self.running.lock().await.take().ok_or(RelayError::NotRunning)?;
        let result = self.teardown(relay).await;
        let _ = self.state.send_replace(RelayState::Stopped);
        info!("Relay stopped");
        result
    }

    /// Check if the relay is running and healthy
    pub fn is_running(&self) -> bool {
        *self.state.borrow() == RelayState::Running
    }

    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    /// Stream of state changes, starting with the current state
    pub fn state_updates(&self) -> impl Stream<Item = RelayState> + Unpin + 'static {
        WatchStream::new(self.state.subscribe())
    }

    /// Receive counters accumulated over the controller's lifetime
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    async fn ensure_startable(&self, running: &mut Option<RunningRelay>) -> Result<()> {
        self.config.validate()?;
        match running.take() {
            None => Ok(()),
            Some(relay) if self.state() == RelayState::Failed => {
                // Failed relays are torn down and replaced
                if let Err(e) = self.teardown(relay).await {
                    warn!(error = %e, "Discarding failed relay");
                }
                let _ = self.state.send_replace(RelayState::Stopped);
                Ok(())
            }
            Some(relay) => {
                *running = Some(relay);
                Err(RelayError::AlreadyRunning)
            }
        }
    }

    fn launch<S: DatagramSource>(&self, source: S, server: BroadcastServer) -> RunningRelay {
        let cancel = CancellationToken::new();
        let registry = Arc::clone(server.registry());
        let receive = ReceiveLoop::new(source, registry, self.config.wire_format)
            .with_max_consecutive_errors(self.config.udp.max_consecutive_errors)
            .with_stats(Arc::clone(&self.stats));

        let _ = self.state.send_replace(RelayState::Running);
        let state = self.state.clone();
        let loop_cancel = cancel.clone();
        let receiver = tokio::spawn(async move {
            let result = receive.run(loop_cancel).await;
            if let Err(e) = &result {
                error!(error = %e, "Receive loop failed, relay needs restart");
                for suggestion in e.recovery_suggestions() {
                    info!("  - {}", suggestion);
                }
                let _ = state.send_replace(RelayState::Failed);
            }
            result
        });

        RunningRelay { server, _guard: cancel.clone().drop_guard(), cancel, receiver }
    }

    async fn teardown(&self, relay: RunningRelay) -> Result<()> {
        let RunningRelay { server, cancel, receiver, _guard } = relay;
        stop_within(self.config.shutdown_grace(), &cancel, receiver, &server).await
    }
}

/// Stop the receive loop, then the server, both inside one `grace` budget
async fn stop_within(
    grace: Duration,
    cancel: &CancellationToken,
    receiver: JoinHandle<Result<LoopExit>>,
    server: &BroadcastServer,
) -> Result<()> {
    let deadline = Instant::now() + grace;

    // Closes the UDP socket before any peer is touched
    cancel.cancel();
    let loop_result = match tokio::time::timeout_at(deadline, receiver).await {
        Ok(Ok(result)) => result.map(|_| ()),
        Ok(Err(join_err)) => {
            error!(error = %join_err, "Receive task aborted");
            Ok(())
        }
        Err(_) => {
            warn!(?grace, "Receive loop did not stop within grace period");
            Err(RelayError::Timeout { duration: grace })
        }
    };

    let server_result = server.shutdown(deadline.saturating_duration_since(Instant::now())).await;
    loop_result.and(server_result)
}

impl std::fmt::Debug for RelayController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayController")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}
