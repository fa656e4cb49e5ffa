//! Point-cloud telemetry relay.
//!
//! pointrelay receives compact binary frames from a local producer over UDP, validates them and
//! pushes each one, in order, to every connected WebSocket subscriber.
//!
//! # Features
//!
//! - **Validated ingest**: malformed datagrams are dropped, never forwarded
//! - **Two wire formats**: compact binary (default) or legacy text, chosen by configuration
//! - **Isolated subscribers**: a slow or dead peer only loses its own frames
//! - **Explicit lifecycle**: typed `start`/`stop` results and an observable state stream
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use pointrelay::{RelayConfig, RelayController};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let controller = RelayController::new(RelayConfig::default());
//!     let endpoints = controller.start().await?;
//!     println!("Relaying udp://{} to ws://{}", endpoints.udp, endpoints.websocket);
//!
//!     tokio::signal::ctrl_c().await?;
//!     controller.stop().await?;
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod config;
mod error;
pub mod protocol;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Ingest
pub mod receiver;
pub mod source;
pub mod sources;

// Egress and lifecycle
pub mod controller;
pub mod server;

// Core exports
pub use config::{RelayConfig, UdpConfig, WebSocketConfig};
pub use controller::{RelayController, RelayEndpoints, RelayState};
pub use error::*;
pub use protocol::{encode, parse_frame};
pub use receiver::{LoopExit, ReceiveLoop, ReceiveStats, StatsSnapshot};
pub use server::{BroadcastReport, BroadcastServer};
pub use source::DatagramSource;
pub use types::*;
