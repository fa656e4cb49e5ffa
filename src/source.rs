//! Source trait for ingest datagrams

use bytes::Bytes;

use crate::Result;

/// Trait for producers of raw ingest datagrams
///
/// The receive loop owns its source and pulls one datagram at a time. Sources handle their own
/// waiting; the loop cancels a pending call by dropping its future, so implementations must be
/// cancel-safe.
#[async_trait::async_trait]
pub trait DatagramSource: Send + 'static {
    /// Wait for the next datagram
    ///
    /// Returns:
    /// - `Ok(Some(bytes))` - one complete datagram
    /// - `Ok(None)` - the source is exhausted and will never produce again
    /// - `Err(e)` - a receive failure; [`SocketUnusable`](crate::RelayError::SocketUnusable) means
    ///   retrying is pointless, anything else may succeed on the next call
    async fn next_datagram(&mut self) -> Result<Option<Bytes>>;

    /// Human readable description for logs
    fn describe(&self) -> String;
}
