//! Relay configuration
//!
//! Every field has a default matching the deployed relay, so an empty YAML document is a valid
//! configuration:
//!
//! ```yaml
//! udp:
//!   bind: 127.0.0.1:14701
//!   recv_buffer_size: 65535
//!   max_consecutive_errors: 10
//! websocket:
//!   bind: 127.0.0.1:9000
//!   idle_timeout_secs: 30
//!   ping_interval_secs: 10
//!   peer_queue_capacity: 64
//! wire_format: binary
//! shutdown_grace_ms: 1000
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::protocol::{HEADER_SIZE, MAX_DATAGRAM_SIZE};
use crate::types::WireFormat;
use crate::{RelayError, Result};

/// Default ingest port the upstream decoder sends to
pub const DEFAULT_UDP_PORT: u16 = 14701;

/// Default WebSocket port subscribers connect to
pub const DEFAULT_WS_PORT: u16 = 9000;

/// Complete relay configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    pub udp: UdpConfig,
    pub websocket: WebSocketConfig,
    /// Payload format pushed to subscribers
    pub wire_format: WireFormat,
    /// Total budget for `stop()`: the receive loop, the server and all peers share it
    pub shutdown_grace_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            udp: UdpConfig::default(),
            websocket: WebSocketConfig::default(),
            wire_format: WireFormat::Binary,
            shutdown_grace_ms: 1000,
        }
    }
}

/// Ingest socket settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UdpConfig {
    pub bind: SocketAddr,
    /// Receive buffer; datagrams longer than this are cut short by the kernel
    pub recv_buffer_size: usize,
    /// Receive failures in a row before the socket is declared unusable
    pub max_consecutive_errors: u32,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_UDP_PORT)),
            recv_buffer_size: MAX_DATAGRAM_SIZE,
            max_consecutive_errors: 10,
        }
    }
}

/// Subscriber server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebSocketConfig {
    pub bind: SocketAddr,
    /// Peers silent for this long are closed
    pub idle_timeout_secs: u64,
    /// How often peers are pinged to prompt a liveness signal
    pub ping_interval_secs: u64,
    /// Frames queued per peer before new frames are dropped for it
    pub peer_queue_capacity: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_WS_PORT)),
            idle_timeout_secs: 30,
            ping_interval_secs: 10,
            peer_queue_capacity: 64,
        }
    }
}

impl WebSocketConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

impl RelayConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml).map_err(|e| {
            RelayError::invalid_config(format!("YAML parse error: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading relay configuration from {}", path.display());

        let yaml = std::fs::read_to_string(path).map_err(|e| RelayError::ConfigFile {
            path: path.to_path_buf(),
            source: Box::new(e),
        })?;
        let config: Self = serde_yaml_ng::from_str(&yaml).map_err(|e| RelayError::ConfigFile {
            path: path.to_path_buf(),
            source: Box::new(e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Grace period for shutdown
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Check invariants serde cannot express
    pub fn validate(&self) -> Result<()> {
        if !self.websocket.bind.ip().is_loopback() {
            return Err(RelayError::invalid_config(format!(
                "websocket.bind must be a loopback address, got {}",
                self.websocket.bind
            )));
        }

        if !(HEADER_SIZE..=MAX_DATAGRAM_SIZE).contains(&self.udp.recv_buffer_size) {
            return Err(RelayError::invalid_config(format!(
                "udp.recv_buffer_size must be between {} and {}, got {}",
                HEADER_SIZE, MAX_DATAGRAM_SIZE, self.udp.recv_buffer_size
            )));
        }

        if self.udp.max_consecutive_errors == 0 {
            return Err(RelayError::invalid_config("udp.max_consecutive_errors must be > 0"));
        }

        if self.websocket.idle_timeout_secs == 0 || self.websocket.ping_interval_secs == 0 {
            return Err(RelayError::invalid_config(
                "websocket.idle_timeout_secs and websocket.ping_interval_secs must be > 0",
            ));
        }

        if self.websocket.peer_queue_capacity == 0 {
            return Err(RelayError::invalid_config("websocket.peer_queue_capacity must be > 0"));
        }

        Ok(())
    }
}
