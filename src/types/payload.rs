//! Encoded payloads ready for fan-out

use bytes::Bytes;
use tokio_tungstenite::tungstenite::Message;

use super::WireFormat;

/// An encoded frame, ready to be pushed to every subscriber
///
/// Cloning is cheap for binary payloads (`Bytes` is reference counted), so the broadcast path
/// converts once and hands each peer a clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Binary wire frame
    Binary(Bytes),

    /// Legacy text frame
    Text(String),
}

impl Payload {
    /// Format this payload was encoded with
    pub fn format(&self) -> WireFormat {
        match self {
            Payload::Binary(_) => WireFormat::Binary,
            Payload::Text(_) => WireFormat::Text,
        }
    }

    /// Encoded length in bytes
    pub fn len(&self) -> usize {
        match self {
            Payload::Binary(bytes) => bytes.len(),
            Payload::Text(text) => text.len(),
        }
    }

    /// Check if the payload carries no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Payload> for Message {
    fn from(payload: Payload) -> Self {
        match payload {
            Payload::Binary(bytes) => Message::Binary(bytes),
            Payload::Text(text) => Message::text(text),
        }
    }
}
