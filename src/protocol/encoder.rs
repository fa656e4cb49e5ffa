//! Frame to wire payload encoding
//!
//! Two formats are produced from the same [`DecodedFrame`]:
//!
//! ## Binary
//!
//! ```text
//! offset  size        type        field
//!      0     4        u32 LE      point_count
//!      4     4        u32 LE      frontier_byte_len
//!      8    12        f32 x3 LE   odom
//!     20    16        f32 x4 LE   quat
//!     36    12        f32 x3 LE   rc_goal
//!     48    12 * N    f32 x3 LE   points
//!      ..   F         UTF-8       frontier
//! ```
//!
//! Unlike the ingest header, both counts are little-endian and the count (not the byte length) of
//! the point cloud is sent.
//!
//! ## Text
//!
//! The legacy format older subscribers still parse: every value printed with four decimals,
//! points first, then the frontier between slashes, then odom, quat and goal.
//!
//! ```text
//! 1.0000 2.0000 3.0000 / frontier / 0.0000 0.0000 ...
//! ```

use std::fmt::Write as _;

use bytes::{BufMut, Bytes, BytesMut};

use super::header::{HEADER_SIZE, POINT_SIZE};
use crate::types::{DecodedFrame, Payload, WireFormat};
use crate::{RelayError, Result};

/// Encode a frame in the requested wire format
pub fn encode(frame: &DecodedFrame, format: WireFormat) -> Result<Payload> {
    match format {
        WireFormat::Binary => encode_binary(frame).map(Payload::Binary),
        WireFormat::Text => Ok(Payload::Text(encode_text(frame))),
    }
}

/// Length of the binary encoding of `frame`
pub fn binary_len(frame: &DecodedFrame) -> usize {
    HEADER_SIZE + frame.point_count() * POINT_SIZE + frame.frontier_byte_len()
}

/// Encode a frame into the binary wire format
///
/// Fails only if a count does not fit the 32-bit header fields, which cannot happen for frames
/// parsed from a datagram.
pub fn encode_binary(frame: &DecodedFrame) -> Result<Bytes> {
    let point_count = u32::try_from(frame.point_count()).map_err(|_| {
        RelayError::encode_failed(format!("{} points exceed a u32 count", frame.point_count()))
    })?;
    let frontier_len = u32::try_from(frame.frontier_byte_len()).map_err(|_| {
        RelayError::encode_failed(format!(
            "{} frontier bytes exceed a u32 length",
            frame.frontier_byte_len()
        ))
    })?;

    let expected = binary_len(frame);
    let mut buf = BytesMut::with_capacity(expected);

    buf.put_u32_le(point_count);
    buf.put_u32_le(frontier_len);
    for value in frame.header_values() {
        buf.put_f32_le(value);
    }
    for point in &frame.points {
        buf.put_f32_le(point.x);
        buf.put_f32_le(point.y);
        buf.put_f32_le(point.z);
    }
    buf.put_slice(frame.frontier.as_bytes());

    if buf.len() != expected {
        return Err(RelayError::encode_failed(format!(
            "encoded {} bytes, layout requires {}",
            buf.len(),
            expected
        )));
    }

    Ok(buf.freeze())
}

/// Encode a frame into the legacy text format
pub fn encode_text(frame: &DecodedFrame) -> String {
    // Roughly "-123.4567 " per value
    let mut out = String::with_capacity(frame.point_count() * 30 + frame.frontier.len() + 120);

    for point in &frame.points {
        for value in point.coords() {
            push_fixed4(&mut out, value);
            out.push(' ');
        }
    }

    out.push_str("/ ");
    out.push_str(&frame.frontier);
    out.push_str(" / ");

    for value in frame.header_values() {
        push_fixed4(&mut out, value);
        out.push(' ');
    }

    out.trim().to_string()
}

const DECIMALS: usize = 4;

/// Append `value` with four decimals, spelling infinities the way legacy clients expect
///
/// Ties round away from zero on the shortest decimal form of the value, so `0.03125` is written
/// `0.0313` and `-0.15625` is written `-0.1563`.
fn push_fixed4(out: &mut String, value: f32) {
    if value.is_nan() {
        out.push_str("NaN");
        return;
    }
    if value.is_infinite() {
        out.push_str(if value.is_sign_positive() { "Infinity" } else { "-Infinity" });
        return;
    }

    let Some(mut scaled) = scaled_half_up(value) else {
        // Writing into a String cannot fail
        let _ = write!(out, "{:.4}", value);
        return;
    };
    while scaled.len() <= DECIMALS {
        scaled.insert(0, 0);
    }

    if value.is_sign_negative() {
        out.push('-');
    }
    let (whole, fraction) = scaled.split_at(scaled.len() - DECIMALS);
    out.extend(whole.iter().map(|d| char::from(b'0' + d)));
    out.push('.');
    out.extend(fraction.iter().map(|d| char::from(b'0' + d)));
}

/// Decimal digits of `|value| * 10^4` rounded half-up, most significant first
fn scaled_half_up(value: f32) -> Option<Vec<u8>> {
    // Shortest round-trip form, e.g. "3.125e-2"
    let sci = format!("{:e}", f64::from(value).abs());
    let (mantissa, exponent) = sci.split_once('e')?;
    let exponent: i64 = exponent.parse().ok()?;
    let digits: Vec<u8> =
        mantissa.bytes().filter(u8::is_ascii_digit).map(|b| b - b'0').collect();

    // digits[i] is worth 10^(exponent - i); keep every digit worth at least 10^-4
    let keep = exponent + 1 + DECIMALS as i64;
    let digit_at =
        |i: i64| usize::try_from(i).ok().and_then(|i| digits.get(i)).copied().unwrap_or(0);
    let mut scaled: Vec<u8> = (0..keep.max(0)).map(digit_at).collect();

    if digit_at(keep) >= 5 {
        let mut carry = true;
        for digit in scaled.iter_mut().rev() {
            if *digit == 9 {
                *digit = 0;
            } else {
                *digit += 1;
                carry = false;
                break;
            }
        }
        if carry {
            scaled.insert(0, 1);
        }
    }

    Some(scaled)
}
