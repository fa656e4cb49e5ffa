//! Ingest datagram parsing and subscriber payload encoding.
//!
//! Both halves are pure functions over byte slices: no I/O, no shared state, safe to call from
//! any task. The receive loop calls [`parse_frame`] then [`encode`] for every datagram.

mod encoder;
mod header;
mod parser;

pub use encoder::{binary_len, encode, encode_binary, encode_text};
pub use header::{FrameHeader, HEADER_SIZE, MAX_DATAGRAM_SIZE, POINT_SIZE};
pub use parser::parse_frame;
