//! Ingest Datagram Header
//!
//! Every datagram the upstream decoder sends starts with a fixed 48-byte header:
//!
//! ```text
//! offset  size  type        field
//!      0    12  f32 x3 LE   odom
//!     12    16  f32 x4 LE   quat
//!     28    12  f32 x3 LE   rc_goal
//!     40     4  u32 BE      pc_size  (point cloud byte length)
//!     44     4  u32 BE      fr_size  (frontier byte length)
//! ```
//!
//! The two size fields are big-endian (the producer writes them with `htonl`) while every float is
//! little-endian. The body follows immediately:
//!
//! ```text
//! [48, 48 + pc_size)                     point cloud, f32 x3 LE per point
//! [48 + pc_size, 48 + pc_size + fr_size) frontier, UTF-8
//! ```
//!
//! Offsets are computed in `u64` so that hostile size fields cannot overflow on 32-bit targets.

use crate::{RelayError, Result};
use tracing::trace;

/// Size of the fixed datagram header in bytes
pub const HEADER_SIZE: usize = 48;

/// Size of one xyz point in bytes
pub const POINT_SIZE: usize = 12;

/// Largest datagram the transport can deliver
pub const MAX_DATAGRAM_SIZE: usize = 65535;

const PC_SIZE_OFFSET: usize = 40;
const FR_SIZE_OFFSET: usize = 44;

/// Parsed fixed header of an ingest datagram
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameHeader {
    pub odom: [f32; 3],
    pub quat: [f32; 4],
    pub rc_goal: [f32; 3],
    /// Point cloud byte length
    pub pc_size: u32,
    /// Frontier byte length
    pub fr_size: u32,
}

impl FrameHeader {
    /// Parse the header from the start of a datagram
    ///
    /// Only checks that the 48 header bytes are present; body bounds are checked by
    /// [`FrameHeader::validate_against`].
    pub fn parse(datagram: &[u8]) -> Result<Self> {
        let Some(header) = datagram.get(..HEADER_SIZE) else {
            return Err(RelayError::ShortDatagram { len: datagram.len() });
        };

        let header = Self {
            odom: read_f32s::<3>(header, 0),
            quat: read_f32s::<4>(header, 12),
            rc_goal: read_f32s::<3>(header, 28),
            pc_size: read_u32_be(header, PC_SIZE_OFFSET),
            fr_size: read_u32_be(header, FR_SIZE_OFFSET),
        };

        trace!(pc_size = header.pc_size, fr_size = header.fr_size, "Parsed datagram header");
        Ok(header)
    }

    /// Offset where the point cloud starts
    pub fn pc_offset(&self) -> usize {
        HEADER_SIZE
    }

    /// Offset one past the point cloud
    pub fn pc_end(&self) -> u64 {
        HEADER_SIZE as u64 + u64::from(self.pc_size)
    }

    /// Offset one past the frontier, the smallest datagram length that holds this frame
    pub fn fr_end(&self) -> u64 {
        self.pc_end() + u64::from(self.fr_size)
    }

    /// Number of points described by `pc_size`, if it is a whole number of triplets
    pub fn point_count(&self) -> Option<usize> {
        let pc_size = self.pc_size as usize;
        (pc_size % POINT_SIZE == 0).then_some(pc_size / POINT_SIZE)
    }

    /// Check the declared sizes against the datagram length
    ///
    /// Truncation is checked before point cloud shape, matching the order the body is read in.
    pub fn validate_against(&self, datagram_len: usize) -> Result<()> {
        let required = self.fr_end();
        if required > datagram_len as u64 {
            return Err(RelayError::FrameTruncated { required, available: datagram_len });
        }

        if self.point_count().is_none() {
            return Err(RelayError::InvalidPointCloud { byte_len: self.pc_size });
        }

        Ok(())
    }
}

fn read_u32_be(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

pub(crate) fn read_f32_le(bytes: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

fn read_f32s<const N: usize>(bytes: &[u8], offset: usize) -> [f32; N] {
    std::array::from_fn(|i| read_f32_le(bytes, offset + i * 4))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::DatagramBuilder;

    #[test]
    fn parse_rejects_short_input() {
        let err = FrameHeader::parse(&[0u8; 47]).unwrap_err();
        assert!(matches!(err, RelayError::ShortDatagram { len: 47 }));
    }

    #[test]
    fn size_fields_are_big_endian() {
        let mut datagram = vec![0u8; HEADER_SIZE];
        datagram[40..44].copy_from_slice(&[0, 0, 0, 24]);
        datagram[44..48].copy_from_slice(&[0, 0, 1, 0]);

        let header = FrameHeader::parse(&datagram).unwrap();
        assert_eq!(header.pc_size, 24);
        assert_eq!(header.fr_size, 256);
        assert_eq!(header.pc_end(), 72);
        assert_eq!(header.fr_end(), 328);
    }

    #[test]
    fn floats_are_little_endian() {
        let datagram = DatagramBuilder::new()
            .odom([1.5, -2.0, 3.25])
            .quat([0.0, 0.0, 0.0, 1.0])
            .rc_goal([7.0, 8.0, 9.0])
            .build();

        let header = FrameHeader::parse(&datagram).unwrap();
        assert_eq!(header.odom, [1.5, -2.0, 3.25]);
        assert_eq!(header.quat, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(header.rc_goal, [7.0, 8.0, 9.0]);
    }

    #[test]
    fn maximal_sizes_do_not_overflow() {
        let header = FrameHeader { pc_size: u32::MAX, fr_size: u32::MAX, ..Default::default() };
        assert_eq!(header.fr_end(), 48 + 2 * u64::from(u32::MAX));
        assert!(matches!(
            header.validate_against(MAX_DATAGRAM_SIZE),
            Err(RelayError::FrameTruncated { .. })
        ));
    }

    #[test]
    fn point_count_requires_whole_triplets() {
        let whole = FrameHeader { pc_size: 36, ..Default::default() };
        let partial = FrameHeader { pc_size: 16, ..Default::default() };
        assert_eq!(whole.point_count(), Some(3));
        assert_eq!(partial.point_count(), None);
    }
}
