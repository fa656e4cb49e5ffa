//! Datagram to frame parsing

use super::header::{FrameHeader, POINT_SIZE, read_f32_le};
use crate::Result;
use crate::types::{DecodedFrame, Point};

/// Parse one ingest datagram into a validated frame
///
/// Errors, in the order they are checked:
/// - [`RelayError::ShortDatagram`](crate::RelayError::ShortDatagram) when fewer than 48 bytes
/// - [`RelayError::FrameTruncated`](crate::RelayError::FrameTruncated) when the declared sizes
///   run past the end of the datagram
/// - [`RelayError::InvalidPointCloud`](crate::RelayError::InvalidPointCloud) when the point
///   cloud is not a whole number of triplets
///
/// Bytes after the frontier are ignored. The frontier is decoded lossily: upstream text is not
/// guaranteed to be valid UTF-8 and a bad byte must not cost the whole frame.
pub fn parse_frame(datagram: &[u8]) -> Result<DecodedFrame> {
    let header = FrameHeader::parse(datagram)?;
    header.validate_against(datagram.len())?;

    // Both ends fit in the datagram after validation
    let pc_start = header.pc_offset();
    let pc_end = header.pc_end() as usize;
    let fr_end = header.fr_end() as usize;

    let points = datagram[pc_start..pc_end]
        .chunks_exact(POINT_SIZE)
        .map(|chunk| {
            Point::new(read_f32_le(chunk, 0), read_f32_le(chunk, 4), read_f32_le(chunk, 8))
        })
        .collect();

    let frontier = String::from_utf8_lossy(&datagram[pc_end..fr_end]).into_owned();

    Ok(DecodedFrame {
        odom: header.odom,
        quat: header.quat,
        rc_goal: header.rc_goal,
        points,
        frontier,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RelayError;
    use crate::protocol::HEADER_SIZE;
    use crate::test_utils::DatagramBuilder;
    use proptest::prelude::*;

    #[test]
    fn parses_two_point_frame() {
        let datagram = DatagramBuilder::new()
            .point([1.0, 2.0, 3.0])
            .point([4.0, 5.0, 6.0])
            .frontier("ab")
            .build();
        assert_eq!(datagram.len(), 74);

        let frame = parse_frame(&datagram).unwrap();
        assert_eq!(frame.point_count(), 2);
        assert_eq!(frame.points[0], Point::new(1.0, 2.0, 3.0));
        assert_eq!(frame.points[1], Point::new(4.0, 5.0, 6.0));
        assert_eq!(frame.frontier, "ab");
        assert_eq!(frame.odom, [0.0; 3]);
        assert_eq!(frame.quat, [0.0; 4]);
        assert_eq!(frame.rc_goal, [0.0; 3]);
    }

    #[test]
    fn header_only_frame_is_valid() {
        let frame = parse_frame(&DatagramBuilder::new().build()).unwrap();
        assert_eq!(frame.point_count(), 0);
        assert!(frame.frontier.is_empty());
    }

    #[test]
    fn declared_sizes_past_the_end_are_truncated() {
        let datagram = DatagramBuilder::new()
            .point([1.0, 2.0, 3.0])
            .frontier("abc")
            .declared_fr_size(10)
            .build();

        let err = parse_frame(&datagram).unwrap_err();
        assert!(matches!(err, RelayError::FrameTruncated { required: 70, available: 63 }));
    }

    #[test]
    fn partial_triplet_is_invalid_point_cloud() {
        let datagram =
            DatagramBuilder::new().raw_point_cloud(&[0u8; 16]).frontier("x").build();

        let err = parse_frame(&datagram).unwrap_err();
        assert!(matches!(err, RelayError::InvalidPointCloud { byte_len: 16 }));
    }

    #[test]
    fn malformed_frontier_is_replaced_not_rejected() {
        let datagram = DatagramBuilder::new().raw_frontier(&[b'o', b'k', 0xFF, b'!']).build();

        let frame = parse_frame(&datagram).unwrap();
        assert_eq!(frame.frontier, "ok\u{FFFD}!");
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut datagram = DatagramBuilder::new().frontier("ab").build();
        datagram.extend_from_slice(b"garbage");

        let frame = parse_frame(&datagram).unwrap();
        assert_eq!(frame.frontier, "ab");
    }

    proptest! {
        #[test]
        fn prop_short_datagrams_are_rejected(
            bytes in prop::collection::vec(any::<u8>(), 0..HEADER_SIZE)
        ) {
            let result = parse_frame(&bytes);
            prop_assert!(
                matches!(result, Err(RelayError::ShortDatagram { len }) if len == bytes.len()),
                "unexpected result {:?}", result
            );
        }

        #[test]
        fn prop_oversized_declarations_are_truncated(
            points in 0usize..8,
            frontier in "[a-z]{0,16}",
            extra in 1u32..10_000
        ) {
            let builder = DatagramBuilder::new()
                .points(vec![[0.5, 1.5, 2.5]; points])
                .frontier(&frontier);
            let actual = frontier.len() as u32;
            let datagram = builder.declared_fr_size(actual + extra).build();

            prop_assert!(
                matches!(parse_frame(&datagram), Err(RelayError::FrameTruncated { .. })),
                "expected FrameTruncated"
            );
        }

        #[test]
        fn prop_non_triplet_point_clouds_are_rejected(
            pc_size in (0usize..600).prop_filter("not a whole triplet", |n| n % 12 != 0)
        ) {
            let datagram = DatagramBuilder::new().raw_point_cloud(&vec![0u8; pc_size]).build();
            prop_assert!(
                matches!(
                    parse_frame(&datagram),
                    Err(RelayError::InvalidPointCloud { byte_len }) if byte_len as usize == pc_size
                ),
                "expected InvalidPointCloud"
            );
        }

        #[test]
        fn prop_valid_frames_keep_points_in_order(
            points in prop::collection::vec(prop::array::uniform3(-1000.0f32..1000.0), 0..32),
            frontier in "\\PC{0,32}"
        ) {
            let datagram =
                DatagramBuilder::new().points(points.clone()).frontier(&frontier).build();
            let frame = parse_frame(&datagram).unwrap();

            prop_assert_eq!(frame.point_count(), points.len());
            for (parsed, expected) in frame.points.iter().zip(points.iter()) {
                prop_assert_eq!(parsed.coords(), *expected);
            }
            prop_assert_eq!(frame.frontier, frontier);
        }
    }
}
