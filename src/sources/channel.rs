//! In-process channel source
//!
//! Used when the datagram producer runs inside the same process. The producer gets a
//! [`DatagramSender`] and pushes datagrams into a bounded queue; the receive loop drains it through
//! [`ChannelSource`]. A full queue drops the newest datagram rather than blocking the producer.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;

use crate::Result;
use crate::source::DatagramSource;

/// Producer half of an in-process datagram channel
#[derive(Debug, Clone)]
pub struct DatagramSender {
    tx: mpsc::Sender<Bytes>,
}

impl DatagramSender {
    /// Queue a datagram without waiting
    ///
    /// Returns `false` if the queue is full or the relay has stopped.
    pub fn try_push(&self, datagram: impl Into<Bytes>) -> bool {
        match self.tx.try_send(datagram.into()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!("Datagram queue full, dropping");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Queue a datagram, waiting for space
    ///
    /// Returns `false` if the relay has stopped.
    pub async fn push(&self, datagram: impl Into<Bytes>) -> bool {
        self.tx.send(datagram.into()).await.is_ok()
    }

    /// Check if the consuming side is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half of an in-process datagram channel
pub struct ChannelSource {
    rx: mpsc::Receiver<Bytes>,
    capacity: usize,
}

impl ChannelSource {
    /// Create a bounded channel holding at most `capacity` pending datagrams
    pub fn bounded(capacity: usize) -> (DatagramSender, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (DatagramSender { tx }, Self { rx, capacity: capacity.max(1) })
    }
}

#[async_trait::async_trait]
impl DatagramSource for ChannelSource {
    async fn next_datagram(&mut self) -> Result<Option<Bytes>> {
        // `None` once every sender is dropped and the queue is drained
        Ok(self.rx.recv().await)
    }

    fn describe(&self) -> String {
        format!("channel(capacity={})", self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_order_then_ends() {
        let (tx, mut source) = ChannelSource::bounded(4);
        assert!(tx.try_push(vec![1u8]));
        assert!(tx.push(vec![2u8]).await);
        drop(tx);

        assert_eq!(source.next_datagram().await.unwrap().unwrap().as_ref(), &[1u8]);
        assert_eq!(source.next_datagram().await.unwrap().unwrap().as_ref(), &[2u8]);
        assert!(source.next_datagram().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn full_queue_drops_newest() {
        let (tx, mut source) = ChannelSource::bounded(1);
        assert!(tx.try_push(Bytes::from_static(b"kept")));
        assert!(!tx.try_push(Bytes::from_static(b"dropped")));

        assert_eq!(source.next_datagram().await.unwrap().unwrap().as_ref(), b"kept");
    }

    #[tokio::test]
    async fn sender_sees_closed_consumer() {
        let (tx, source) = ChannelSource::bounded(1);
        drop(source);
        assert!(tx.is_closed());
        assert!(!tx.try_push(vec![0u8]));
    }
}
