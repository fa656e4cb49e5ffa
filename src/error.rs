//! Error types for the telemetry relay.
//!
//! Every failure the relay can observe is a variant of [`RelayError`]. The variants fall into
//! three groups with different handling rules:
//!
//! ## Frame Errors
//!
//! - [`RelayError::ShortDatagram`], [`RelayError::FrameTruncated`],
//!   [`RelayError::InvalidPointCloud`]: produced by the frame parser
//! - [`RelayError::Encode`]: produced by the wire encoder
//!
//! These are handled by dropping the offending datagram. They never leave the receive loop.
//!
//! ## Transport Errors
//!
//! - [`RelayError::TransportReceive`]: one failed receive call, logged and retried
//! - [`RelayError::SocketUnusable`]: the ingest socket cannot be used any more; this is the only
//!   error that escalates from the receive loop to the controller
//! - [`RelayError::PeerSend`]: isolated to a single subscriber
//!
//! ## Lifecycle Errors
//!
//! Binding, configuration and start/stop misuse. Returned from
//! [`RelayController::start`](crate::RelayController::start) and
//! [`RelayController::stop`](crate::RelayController::stop).
//!
//! ```rust
//! use pointrelay::RelayError;
//!
//! let error = RelayError::ShortDatagram { len: 12 };
//! assert!(error.is_frame_error());
//! assert!(!error.is_fatal());
//! for suggestion in error.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T, E = RelayError> = std::result::Result<T, E>;

/// Main error type for relay operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RelayError {
    #[error("Datagram too short: {len} bytes, header needs 48")]
    ShortDatagram { len: usize },

    #[error("Frame truncated: header declares {required} bytes, datagram has {available}")]
    FrameTruncated { required: u64, available: usize },

    #[error("Invalid point cloud: {byte_len} bytes is not a whole number of xyz triplets")]
    InvalidPointCloud { byte_len: u32 },

    #[error("Encode failure: {details}")]
    Encode { details: String },

    #[error("UDP receive failed")]
    TransportReceive {
        #[source]
        source: std::io::Error,
    },

    #[error("UDP socket unusable: {reason}")]
    SocketUnusable {
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Send to peer {peer} failed: {reason}")]
    PeerSend { peer: u64, reason: String },

    #[error("Failed to bind {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("WebSocket error: {source}")]
    WebSocket {
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("Invalid configuration: {details}")]
    Config { details: String },

    #[error("Configuration file error: {path}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Relay is already running")]
    AlreadyRunning,

    #[error("Relay is not running")]
    NotRunning,
}

impl RelayError {
    /// Returns true for errors that only affect a single datagram.
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            RelayError::ShortDatagram { .. }
                | RelayError::FrameTruncated { .. }
                | RelayError::InvalidPointCloud { .. }
                | RelayError::Encode { .. }
        )
    }

    /// Returns true when the receive loop cannot continue and the controller must act.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RelayError::SocketUnusable { .. })
    }

    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            RelayError::ShortDatagram { .. } => true,
            RelayError::FrameTruncated { .. } => true,
            RelayError::InvalidPointCloud { .. } => true,
            RelayError::Encode { .. } => true,
            RelayError::TransportReceive { .. } => true,
            RelayError::SocketUnusable { .. } => true,
            RelayError::PeerSend { .. } => true,
            RelayError::Bind { .. } => true,
            RelayError::WebSocket { .. } => true,
            RelayError::Timeout { .. } => true,
            RelayError::Config { .. } => false,
            RelayError::ConfigFile { .. } => false,
            RelayError::AlreadyRunning => false,
            RelayError::NotRunning => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            RelayError::ShortDatagram { .. }
            | RelayError::FrameTruncated { .. }
            | RelayError::InvalidPointCloud { .. } => vec![
                "Check the producer writes the 48-byte header",
                "Verify pcSize and frSize are sent big-endian",
                "Ensure datagrams are not split by the producer",
            ],
            RelayError::Encode { .. } => vec![
                "Report the frame that triggered the failure",
                "Switch to the other wire format as a workaround",
            ],
            RelayError::TransportReceive { .. } => vec![
                "Check the ingest port is still bound",
                "Verify system socket buffer limits",
            ],
            RelayError::SocketUnusable { .. } => vec![
                "Restart the relay",
                "Check no other process closed or stole the ingest port",
            ],
            RelayError::PeerSend { .. } => vec![
                "Subscriber is too slow or disconnected",
                "Increase the peer queue capacity",
            ],
            RelayError::Bind { .. } => vec![
                "Check the port is not already in use",
                "Use a different port in the configuration",
                "Verify the address belongs to this host",
            ],
            RelayError::WebSocket { .. } => vec![
                "Check the client speaks RFC 6455 WebSocket",
                "Verify the client connects to the loopback address",
            ],
            RelayError::Config { .. } | RelayError::ConfigFile { .. } => vec![
                "Check the configuration file syntax",
                "Compare against the documented defaults",
            ],
            RelayError::Timeout { .. } => vec![
                "Increase the shutdown grace period",
                "Check for subscribers that never acknowledge close",
            ],
            RelayError::AlreadyRunning => vec!["Stop the relay before starting it again"],
            RelayError::NotRunning => vec!["Start the relay before stopping it"],
        }
    }

    /// Helper constructor for encode failures.
    pub fn encode_failed(details: impl Into<String>) -> Self {
        RelayError::Encode { details: details.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn invalid_config(details: impl Into<String>) -> Self {
        RelayError::Config { details: details.into() }
    }

    /// Helper constructor for an unusable ingest socket.
    pub fn socket_unusable(reason: impl Into<String>, source: Option<std::io::Error>) -> Self {
        RelayError::SocketUnusable { reason: reason.into(), source }
    }

    /// Helper constructor for per-peer send failures.
    pub fn peer_send_failed(peer: u64, reason: impl Into<String>) -> Self {
        RelayError::PeerSend { peer, reason: reason.into() }
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::TransportReceive { source: err }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        RelayError::WebSocket { source: err }
    }
}
