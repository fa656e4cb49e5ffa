//! Core types for the relay pipeline.
//!
//! ## Architecture
//!
//! - [`DecodedFrame`] is one validated datagram: pose, orientation, goal, point cloud, frontier
//! - [`Point`] is a single xyz triplet of the cloud
//! - [`WireFormat`] selects the encoding pushed to subscribers
//! - [`Payload`] is an encoded frame ready for fan-out
//!
//! ## Usage Example
//!
//! ```rust
//! use pointrelay::types::{DecodedFrame, Point, WireFormat};
//! use pointrelay::protocol::encode;
//!
//! let frame = DecodedFrame {
//!     points: vec![Point::new(1.0, 2.0, 3.0)],
//!     frontier: "ab".to_string(),
//!     ..Default::default()
//! };
//!
//! let payload = encode(&frame, WireFormat::Binary).unwrap();
//! assert_eq!(payload.len(), 48 + 12 + 2);
//! ```

mod frame;
mod payload;
mod wire_format;

pub use frame::{DecodedFrame, Point};
pub use payload::Payload;
pub use wire_format::WireFormat;
