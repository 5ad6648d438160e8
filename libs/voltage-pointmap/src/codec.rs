//! Value codec: wire bytes <-> numbers, text and sequences
//!
//! Pure functions, no I/O. Every register contributes two big-endian
//! bytes; coil points arrive normalized to one 0/1 word per address.
//!
//! Scaling uses fixed-precision rounding: the precision of a point is the
//! number of decimal places implied by its coefficient and offset
//! (0.1 -> 1, 0.01 -> 2, -10 -> 0), capped at [`MAX_DECIMALS`]. Reads round
//! `raw * coefficient + offset` to that precision so `123 * 0.1 - 10`
//! yields exactly `2.3`.

use tracing::trace;

use crate::catalog::{ByteOrder, DataType, PointDescriptor};
use crate::error::{PointMapError, Result};

/// Coefficients with more decimals than this are applied unrounded.
pub const MAX_DECIMALS: i32 = 9;

/// Decimal places needed to represent `x` exactly, if at most [`MAX_DECIMALS`].
pub fn decimal_places(x: f64) -> Option<i32> {
    if !x.is_finite() {
        return None;
    }
    (0..=MAX_DECIMALS).find(|&d| (round_to(x, d) - x).abs() <= x.abs() * 1e-12)
}

/// Rounding precision for a descriptor, `None` when it cannot be expressed
/// in decimal places.
pub fn precision(point: &PointDescriptor) -> Option<i32> {
    let coefficient = decimal_places(point.coefficient())?;
    let offset = decimal_places(point.offset)?;
    Some(coefficient.max(offset))
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Raw register value -> engineering value.
pub fn scale(raw: f64, point: &PointDescriptor) -> f64 {
    let value = raw * point.coefficient() + point.offset;
    match precision(point) {
        Some(decimals) => round_to(value, decimals),
        None => value,
    }
}

/// Engineering value -> raw register value, rounded and clamped to the
/// point's data type.
pub fn unscale(value: f64, point: &PointDescriptor) -> f64 {
    let raw = ((value - point.offset) / point.coefficient()).round();
    let (min, max) = point.data_type.raw_range();
    raw.clamp(min, max)
}

/// Decode one scalar from the leading bytes of `bytes`.
pub fn decode_raw(bytes: &[u8], data_type: DataType, order: ByteOrder) -> Result<f64> {
    let width = data_type.byte_width();
    if bytes.len() < width {
        return Err(PointMapError::short_data(width, bytes.len()));
    }
    let value = match data_type {
        DataType::U16 => f64::from(u16::from_be_bytes([bytes[0], bytes[1]])),
        DataType::S16 => f64::from(i16::from_be_bytes([bytes[0], bytes[1]])),
        DataType::U32 => f64::from(u32::from_be_bytes(word_order(bytes, order))),
        DataType::S32 => f64::from(i32::from_be_bytes(word_order(bytes, order))),
    };
    Ok(value)
}

/// Encode an integral raw value at the data type's natural width.
pub fn encode_raw(raw: f64, data_type: DataType, order: ByteOrder) -> Vec<u8> {
    match data_type {
        DataType::U16 => (raw as u16).to_be_bytes().to_vec(),
        DataType::S16 => (raw as i16).to_be_bytes().to_vec(),
        DataType::U32 => word_order(&(raw as u32).to_be_bytes(), order).to_vec(),
        DataType::S32 => word_order(&(raw as i32).to_be_bytes(), order).to_vec(),
    }
}

/// Swap the two 16-bit halves when the low word comes first.
fn word_order(bytes: &[u8], order: ByteOrder) -> [u8; 4] {
    match order {
        ByteOrder::BigEndian => [bytes[0], bytes[1], bytes[2], bytes[3]],
        ByteOrder::LittleEndian => [bytes[2], bytes[3], bytes[0], bytes[1]],
    }
}

pub fn decode_scaled(bytes: &[u8], point: &PointDescriptor) -> Result<f64> {
    let raw = decode_raw(bytes, point.data_type, point.byte_order)?;
    Ok(scale(raw, point))
}

/// Encode a scaled value into exactly `quantity * 2` bytes. A scalar
/// narrower than the point is zero-padded at the tail.
pub fn encode_scaled(value: f64, point: &PointDescriptor) -> Result<Vec<u8>> {
    if !value.is_finite() {
        return Err(PointMapError::unsupported(
            "",
            format!("cannot encode non-finite value {value}"),
        ));
    }
    let raw = unscale(value, point);
    let mut bytes = encode_raw(raw, point.data_type, point.byte_order);
    bytes.resize(point.byte_len(), 0);
    Ok(bytes)
}

/// Decode a NUL-terminated string. Little-endian points store each pair of
/// characters swapped.
pub fn decode_text(bytes: &[u8], order: ByteOrder) -> String {
    let mut buf = bytes.to_vec();
    if buf.len() % 2 != 0 {
        buf.push(0);
    }
    if order == ByteOrder::LittleEndian {
        swap_pairs(&mut buf);
    }
    if let Some(end) = buf.iter().position(|&b| b == 0) {
        buf.truncate(end);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Encode text into exactly `quantity * 2` bytes, padding or truncating the tail.
pub fn encode_text(text: &str, point: &PointDescriptor) -> Vec<u8> {
    let mut buf = text.as_bytes().to_vec();
    buf.resize(point.byte_len(), 0);
    if point.byte_order == ByteOrder::LittleEndian {
        swap_pairs(&mut buf);
    }
    buf
}

fn swap_pairs(buf: &mut [u8]) {
    for pair in buf.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}

/// Decode consecutive scalars in address order.
///
/// Fails when not even one element fits; a trailing partial element is
/// dropped.
pub fn decode_sequence(bytes: &[u8], point: &PointDescriptor) -> Result<Vec<f64>> {
    let width = point.data_type.byte_width();
    if bytes.len() < width {
        return Err(PointMapError::short_data(width, bytes.len()));
    }
    let chunks = bytes.chunks_exact(width);
    if !chunks.remainder().is_empty() {
        trace!(
            "Dropping {} trailing bytes of a {:?} sequence",
            chunks.remainder().len(),
            point.data_type
        );
    }
    chunks.map(|chunk| decode_scaled(chunk, point)).collect()
}

/// Encode scalars back to back, then pad or truncate the tail to
/// `quantity * 2` bytes.
pub fn encode_sequence<I>(values: I, point: &PointDescriptor) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = f64>,
{
    let mut buf = Vec::with_capacity(point.byte_len());
    for value in values {
        if !value.is_finite() {
            return Err(PointMapError::unsupported(
                "",
                format!("cannot encode non-finite value {value}"),
            ));
        }
        let raw = unscale(value, point);
        buf.extend(encode_raw(raw, point.data_type, point.byte_order));
    }
    buf.resize(point.byte_len(), 0);
    Ok(buf)
}

/// Opaque payloads must cover the point exactly.
pub fn encode_opaque(bytes: &[u8], point: &PointDescriptor) -> Result<Vec<u8>> {
    if bytes.len() != point.byte_len() {
        return Err(PointMapError::length_mismatch(point.byte_len(), bytes.len()));
    }
    Ok(bytes.to_vec())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn point(data_type: DataType) -> PointDescriptor {
        PointDescriptor::new(0).with_data_type(data_type)
    }

    #[test]
    fn test_scaling_example() {
        let desc = point(DataType::U16)
            .with_coefficient(0.1)
            .with_offset(-10.0);
        let value = decode_scaled(&123u16.to_be_bytes(), &desc).unwrap();
        assert_eq!(value, 2.3);
    }

    #[test]
    fn test_scaling_cancels_float_drift() {
        let desc = point(DataType::U16).with_coefficient(0.01);
        // 0.01 * 2199 is 21.990000000000002 without rounding
        assert_eq!(scale(2199.0, &desc), 21.99);
        let desc = point(DataType::U16).with_coefficient(0.1);
        assert_eq!(scale(3.0, &desc), 0.3);
    }

    #[test]
    fn test_zero_coefficient_means_unscaled() {
        let desc = point(DataType::S16);
        assert_eq!(decode_scaled(&(-5i16).to_be_bytes(), &desc).unwrap(), -5.0);
    }

    #[test]
    fn test_decimal_places() {
        assert_eq!(decimal_places(1.0), Some(0));
        assert_eq!(decimal_places(0.1), Some(1));
        assert_eq!(decimal_places(0.25), Some(2));
        assert_eq!(decimal_places(-10.0), Some(0));
        assert_eq!(decimal_places(1.0 / 3.0), None);
        assert_eq!(decimal_places(0.0), Some(0));
        assert_eq!(decimal_places(1e-9), Some(9));
        assert_eq!(decimal_places(1e-10), None);
        assert_eq!(decimal_places(123_456.789), Some(3));
    }

    #[test]
    fn test_tiny_coefficient_is_not_rounded_away() {
        let point = PointDescriptor::new(0).with_coefficient(1e-10);
        assert_eq!(precision(&point), None);
        let value = scale(65535.0, &point);
        assert!((value - 6.5535e-6).abs() < 1e-18);
    }

    #[test]
    fn test_word_swap_for_little_endian() {
        let bytes = [0x00, 0x01, 0x00, 0x02];
        let be = decode_raw(&bytes, DataType::U32, ByteOrder::BigEndian).unwrap();
        let le = decode_raw(&bytes, DataType::U32, ByteOrder::LittleEndian).unwrap();
        assert_eq!(be, 65538.0);
        assert_eq!(le, 131073.0);
        assert_eq!(
            encode_raw(131073.0, DataType::U32, ByteOrder::LittleEndian),
            bytes.to_vec()
        );
    }

    #[test]
    fn test_signed_32_bit() {
        let bytes = encode_raw(-123456.0, DataType::S32, ByteOrder::LittleEndian);
        let value = decode_raw(&bytes, DataType::S32, ByteOrder::LittleEndian).unwrap();
        assert_eq!(value, -123456.0);
    }

    #[test]
    fn test_round_trip_all_widths_and_orders() {
        let samples: [(DataType, f64); 4] = [
            (DataType::U16, 65535.0),
            (DataType::S16, -32768.0),
            (DataType::U32, 4_000_000_000.0),
            (DataType::S32, -2_000_000_000.0),
        ];
        for (data_type, value) in samples {
            for order in [ByteOrder::BigEndian, ByteOrder::LittleEndian] {
                let desc = point(data_type).with_byte_order(order);
                let bytes = encode_scaled(value, &desc).unwrap();
                assert_eq!(bytes.len(), desc.byte_len());
                assert_eq!(decode_scaled(&bytes, &desc).unwrap(), value);
            }
        }
    }

    #[test]
    fn test_scaled_round_trip_within_one_unit() {
        let desc = point(DataType::S16)
            .with_coefficient(0.01)
            .with_offset(-10.0);
        for value in [-10.0, 0.0, 2.3, 21.99, 123.45] {
            let bytes = encode_scaled(value, &desc).unwrap();
            let back = decode_scaled(&bytes, &desc).unwrap();
            assert!((back - value).abs() <= 0.01, "{value} -> {back}");
        }
    }

    #[test]
    fn test_write_clamps_to_width() {
        let desc = point(DataType::U16);
        assert_eq!(encode_scaled(70000.0, &desc).unwrap(), vec![0xFF, 0xFF]);
        assert_eq!(encode_scaled(-1.0, &desc).unwrap(), vec![0x00, 0x00]);
        assert!(encode_scaled(f64::NAN, &desc).is_err());
    }

    #[test]
    fn test_short_data() {
        let err = decode_raw(&[0x01], DataType::U16, ByteOrder::BigEndian).unwrap_err();
        assert!(matches!(
            err,
            PointMapError::ShortData {
                expected: 2,
                actual: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_text_decode_truncates_at_nul() {
        assert_eq!(decode_text(b"AB\0\0CD", ByteOrder::BigEndian), "AB");
        assert_eq!(decode_text(b"ABC", ByteOrder::BigEndian), "ABC");
        assert_eq!(decode_text(b"BADC\0\0", ByteOrder::LittleEndian), "ABCD");
    }

    #[test]
    fn test_text_encode_pads_and_swaps() {
        let desc = point(DataType::U16).with_quantity(3);
        assert_eq!(encode_text("ABC", &desc), b"ABC\0\0\0".to_vec());
        assert_eq!(encode_text("ABCDEFGH", &desc), b"ABCDEF".to_vec());

        let le = desc.clone().with_byte_order(ByteOrder::LittleEndian);
        let bytes = encode_text("ABC", &le);
        assert_eq!(bytes, b"BA\0C\0\0".to_vec());
        assert_eq!(decode_text(&bytes, ByteOrder::LittleEndian), "ABC");
    }

    #[test]
    fn test_sequence_drops_partial_tail() {
        let desc = point(DataType::U16).with_quantity(3);
        let values = decode_sequence(&[0, 1, 0, 2, 0], &desc).unwrap();
        assert_eq!(values, vec![1.0, 2.0]);

        let wide = point(DataType::U32).with_quantity(1);
        assert!(matches!(
            decode_sequence(&[0, 1], &wide),
            Err(PointMapError::ShortData { .. })
        ));
    }

    #[test]
    fn test_sequence_encode_fits_quantity() {
        let desc = point(DataType::U16).with_quantity(3);
        let bytes = encode_sequence([1.0, 2.0], &desc).unwrap();
        assert_eq!(bytes, vec![0, 1, 0, 2, 0, 0]);
        let bytes = encode_sequence([1.0, 2.0, 3.0, 4.0], &desc).unwrap();
        assert_eq!(bytes, vec![0, 1, 0, 2, 0, 3]);
    }

    #[test]
    fn test_opaque_length_must_match() {
        let desc = point(DataType::U16).with_quantity(2);
        assert_eq!(encode_opaque(&[1, 2, 3, 4], &desc).unwrap(), vec![1, 2, 3, 4]);
        assert!(matches!(
            encode_opaque(&[1, 2], &desc),
            Err(PointMapError::LengthMismatch {
                expected: 4,
                actual: 2,
                ..
            })
        ));
    }
}
