//! Receive loop: datagram source to subscribers
//!
//! One task owns the [`DatagramSource`] and handles datagrams strictly in arrival order: parse,
//! encode, broadcast. Malformed datagrams are dropped, receive failures are retried with backoff,
//! and only cancellation, source exhaustion or an unusable socket end the loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::protocol::{encode, parse_frame};
use crate::server::{BroadcastReport, PeerRegistry};
use crate::source::DatagramSource;
use crate::types::{DecodedFrame, WireFormat};
use crate::{RelayError, Result};

/// Longest pause between receive retries
const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Counters updated by the receive loop
#[derive(Debug, Default)]
pub struct ReceiveStats {
    datagrams: AtomicU64,
    relayed: AtomicU64,
    short: AtomicU64,
    truncated: AtomicU64,
    invalid_point_cloud: AtomicU64,
    encode_failures: AtomicU64,
    receive_errors: AtomicU64,
}

/// Point-in-time copy of [`ReceiveStats`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Datagrams pulled from the source
    pub datagrams: u64,
    /// Frames encoded and handed to the broadcaster
    pub relayed: u64,
    pub short: u64,
    pub truncated: u64,
    pub invalid_point_cloud: u64,
    pub encode_failures: u64,
    pub receive_errors: u64,
}

impl StatsSnapshot {
    /// Datagrams dropped for any parse or encode reason
    pub fn dropped(&self) -> u64 {
        self.short + self.truncated + self.invalid_point_cloud + self.encode_failures
    }
}

impl ReceiveStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            datagrams: self.datagrams.load(Ordering::Relaxed),
            relayed: self.relayed.load(Ordering::Relaxed),
            short: self.short.load(Ordering::Relaxed),
            truncated: self.truncated.load(Ordering::Relaxed),
            invalid_point_cloud: self.invalid_point_cloud.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        let _ = counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_drop(&self, err: &RelayError) {
        match err {
            RelayError::ShortDatagram { .. } => Self::bump(&self.short),
            RelayError::FrameTruncated { .. } => Self::bump(&self.truncated),
            RelayError::InvalidPointCloud { .. } => Self::bump(&self.invalid_point_cloud),
            _ => Self::bump(&self.encode_failures),
        }
    }
}

/// How the loop ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Stop was requested
    Cancelled,
    /// The source will never produce again
    SourceClosed,
}

/// Relay one datagram: parse, encode and broadcast.
///
/// Returns the broadcast outcome, or the error that caused the datagram to be dropped. Nothing is
/// broadcast unless both parse and encode succeed.
pub fn relay_datagram(
    datagram: &[u8],
    format: WireFormat,
    registry: &PeerRegistry,
) -> Result<BroadcastReport> {
    let frame = parse_frame(datagram)?;
    log_frame(&frame);
    let payload = encode(&frame, format)?;
    Ok(registry.broadcast(payload))
}

fn log_frame(frame: &DecodedFrame) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    let [ox, oy, oz] = frame.odom;
    let [qx, qy, qz, qw] = frame.quat;
    let [gx, gy, gz] = frame.rc_goal;
    debug!(
        point_count = frame.point_count(),
        frontier_bytes = frame.frontier_byte_len(),
        "Frame odom=({:.4}, {:.4}, {:.4}) quat=({:.4}, {:.4}, {:.4}, {:.4}) \
         rc_goal=({:.4}, {:.4}, {:.4})",
        ox,
        oy,
        oz,
        qx,
        qy,
        qz,
        qw,
        gx,
        gy,
        gz
    );
}

/// The receive loop
pub struct ReceiveLoop<S> {
    source: S,
    registry: Arc<PeerRegistry>,
    format: WireFormat,
    max_consecutive_errors: u32,
    stats: Arc<ReceiveStats>,
}

impl<S> ReceiveLoop<S>
where
    S: DatagramSource,
{
    pub fn new(source: S, registry: Arc<PeerRegistry>, format: WireFormat) -> Self {
        Self {
            source,
            registry,
            format,
            max_consecutive_errors: 10,
            stats: Arc::new(ReceiveStats::default()),
        }
    }

    /// Receive failures in a row tolerated before the source is declared unusable
    pub fn with_max_consecutive_errors(mut self, max: u32) -> Self {
        self.max_consecutive_errors = max.max(1);
        self
    }

    /// Share counters with an existing owner
    pub fn with_stats(mut self, stats: Arc<ReceiveStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> Arc<ReceiveStats> {
        Arc::clone(&self.stats)
    }

    /// Run until cancelled, the source ends, or the source becomes unusable.
    ///
    /// The source is dropped on return, which closes its socket.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<LoopExit> {
        let describe = self.source.describe();
        info!(source = %describe, format = %self.format, "Receive loop started");
        let mut consecutive_errors = 0u32;

        let exit = loop {
            let received = tokio::select! {
                biased;
                () = cancel.cancelled() => break Ok(LoopExit::Cancelled),
                received = self.source.next_datagram() => received,
            };

            // A stop racing a datagram wins: nothing is decoded after cancellation
            if cancel.is_cancelled() {
                break Ok(LoopExit::Cancelled);
            }

            match received {
                Ok(Some(datagram)) => {
                    consecutive_errors = 0;
                    ReceiveStats::bump(&self.stats.datagrams);
                    self.handle(&datagram);
                }
                Ok(None) => {
                    info!(source = %describe, "Datagram source closed");
                    break Ok(LoopExit::SourceClosed);
                }
                Err(e) if e.is_fatal() => {
                    ReceiveStats::bump(&self.stats.receive_errors);
                    error!(source = %describe, error = %e, "Datagram source unusable");
                    break Err(e);
                }
                Err(e) => {
                    ReceiveStats::bump(&self.stats.receive_errors);
                    consecutive_errors += 1;
                    error!(
                        source = %describe,
                        error = %e,
                        "Receive failed ({}/{})",
                        consecutive_errors,
                        self.max_consecutive_errors
                    );

                    if consecutive_errors >= self.max_consecutive_errors {
                        break Err(RelayError::socket_unusable(
                            format!(
                                "{} consecutive receive failures on {}",
                                consecutive_errors, describe
                            ),
                            None,
                        ));
                    }

                    // 50ms, 100ms, 200ms, ... capped
                    let shift = consecutive_errors.saturating_sub(1).min(6);
                    let backoff = Duration::from_millis(50 << shift).min(MAX_BACKOFF);
                    tokio::select! {
                        () = cancel.cancelled() => break Ok(LoopExit::Cancelled),
                        () = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        };

        let stats = self.stats.snapshot();
        info!(
            source = %describe,
            datagrams = stats.datagrams,
            relayed = stats.relayed,
            dropped = stats.dropped(),
            "Receive loop ended"
        );
        exit
    }

    fn handle(&self, datagram: &[u8]) {
        match relay_datagram(datagram, self.format, &self.registry) {
            Ok(report) => {
                ReceiveStats::bump(&self.stats.relayed);
                trace!(len = datagram.len(), delivered = report.delivered, "Frame relayed");
            }
            Err(e) => {
                self.stats.record_drop(&e);
                match e {
                    RelayError::ShortDatagram { len } => trace!(len, "Dropping short datagram"),
                    RelayError::Encode { .. } => {
                        warn!(len = datagram.len(), error = %e, "Dropping frame")
                    }
                    _ => debug!(len = datagram.len(), error = %e, "Dropping malformed datagram"),
                }
            }
        }
    }
}
