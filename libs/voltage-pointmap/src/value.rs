//! Typed leaf values and their codec variants
//!
//! Every annotated record field implements [`PointField`]; the derive
//! macro additionally reads [`PointType`] to build the record schema at
//! compile time. The codec variant is fixed by the Rust type of the field:
//!
//! | Field type                   | Variant    |
//! |------------------------------|------------|
//! | `bool`                       | `Bool`     |
//! | `i8`..`i64`, `u8`..`u64`     | `Integer`  |
//! | `f32`, `f64`                 | `Float`    |
//! | `String`                     | `Text`     |
//! | [`RawBytes`]                 | `Opaque`   |
//! | `Vec<T>` of the above scalars| `Sequence` |
//! | `Option<T>`                  | as `T`, skipped on write when `None` |

use std::fmt;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::catalog::PointDescriptor;
use crate::codec;
use crate::error::{PointMapError, Result};

/// Closed set of codec variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Bool,
    Integer,
    Float,
    Text,
    Opaque,
    Sequence,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Text => "text",
            Self::Opaque => "opaque",
            Self::Sequence => "sequence",
        };
        f.write_str(name)
    }
}

/// Accessor for one leaf value.
pub trait PointField: Send + Sync {
    fn kind(&self) -> ValueKind;

    /// Replace the value with the decoded bytes of `point`.
    fn decode_from(&mut self, bytes: &[u8], point: &PointDescriptor) -> Result<()>;

    /// Exactly `point.byte_len()` bytes, or `None` to leave the device untouched.
    fn encode_to(&self, point: &PointDescriptor) -> Result<Option<Vec<u8>>>;
}

/// Compile-time description of a leaf type.
pub trait PointType {
    const KIND: ValueKind;
    const NULLABLE: bool = false;
}

/// Scalars usable directly or as sequence elements.
pub trait Numeric: Copy + Default + Send + Sync + 'static {
    const KIND: ValueKind;

    fn from_f64(value: f64) -> Self;

    fn to_f64(self) -> f64;
}

impl Numeric for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn from_f64(value: f64) -> Self {
        value != 0.0
    }

    fn to_f64(self) -> f64 {
        if self {
            1.0
        } else {
            0.0
        }
    }
}

macro_rules! impl_numeric {
    ($kind:ident: $($t:ty),*) => {$(
        impl Numeric for $t {
            const KIND: ValueKind = ValueKind::$kind;

            // Float to integer casts truncate toward zero and saturate.
            fn from_f64(value: f64) -> Self {
                value as $t
            }

            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    )*};
}

impl_numeric!(Integer: i8, i16, i32, i64, u8, u16, u32, u64);
impl_numeric!(Float: f32, f64);

macro_rules! impl_scalar_field {
    ($($t:ty),*) => {$(
        impl PointType for $t {
            const KIND: ValueKind = <$t as Numeric>::KIND;
        }

        impl PointField for $t {
            fn kind(&self) -> ValueKind {
                <$t as Numeric>::KIND
            }

            fn decode_from(&mut self, bytes: &[u8], point: &PointDescriptor) -> Result<()> {
                *self = <$t as Numeric>::from_f64(codec::decode_scaled(bytes, point)?);
                Ok(())
            }

            fn encode_to(&self, point: &PointDescriptor) -> Result<Option<Vec<u8>>> {
                codec::encode_scaled(Numeric::to_f64(*self), point).map(Some)
            }
        }
    )*};
}

impl_scalar_field!(bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

fn require_registers(point: &PointDescriptor, kind: ValueKind) -> Result<()> {
    if point.register_kind.is_bit() {
        return Err(PointMapError::unsupported(
            "",
            format!("{kind} values cannot map to {} points", point.register_kind),
        ));
    }
    Ok(())
}

impl PointType for String {
    const KIND: ValueKind = ValueKind::Text;
}

impl PointField for String {
    fn kind(&self) -> ValueKind {
        ValueKind::Text
    }

    fn decode_from(&mut self, bytes: &[u8], point: &PointDescriptor) -> Result<()> {
        require_registers(point, ValueKind::Text)?;
        *self = codec::decode_text(bytes, point.byte_order);
        Ok(())
    }

    fn encode_to(&self, point: &PointDescriptor) -> Result<Option<Vec<u8>>> {
        require_registers(point, ValueKind::Text)?;
        Ok(Some(codec::encode_text(self, point)))
    }
}

/// Register bytes passed through verbatim, bypassing scaling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawBytes(pub Vec<u8>);

impl RawBytes {
    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for RawBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for RawBytes {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl Deref for RawBytes {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for RawBytes {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl PointType for RawBytes {
    const KIND: ValueKind = ValueKind::Opaque;
}

impl PointField for RawBytes {
    fn kind(&self) -> ValueKind {
        ValueKind::Opaque
    }

    fn decode_from(&mut self, bytes: &[u8], point: &PointDescriptor) -> Result<()> {
        require_registers(point, ValueKind::Opaque)?;
        self.0 = bytes.to_vec();
        Ok(())
    }

    fn encode_to(&self, point: &PointDescriptor) -> Result<Option<Vec<u8>>> {
        require_registers(point, ValueKind::Opaque)?;
        codec::encode_opaque(&self.0, point).map(Some)
    }
}

impl<E: Numeric> PointType for Vec<E> {
    const KIND: ValueKind = ValueKind::Sequence;
}

impl<E: Numeric> PointField for Vec<E> {
    fn kind(&self) -> ValueKind {
        ValueKind::Sequence
    }

    fn decode_from(&mut self, bytes: &[u8], point: &PointDescriptor) -> Result<()> {
        let values = codec::decode_sequence(bytes, point)?;
        self.clear();
        self.extend(values.into_iter().map(E::from_f64));
        Ok(())
    }

    fn encode_to(&self, point: &PointDescriptor) -> Result<Option<Vec<u8>>> {
        codec::encode_sequence(self.iter().map(|v| v.to_f64()), point).map(Some)
    }
}

impl<T: PointType> PointType for Option<T> {
    const KIND: ValueKind = T::KIND;
    const NULLABLE: bool = true;
}

impl<T> PointField for Option<T>
where
    T: PointField + PointType + Default,
{
    fn kind(&self) -> ValueKind {
        T::KIND
    }

    fn decode_from(&mut self, bytes: &[u8], point: &PointDescriptor) -> Result<()> {
        let mut value = T::default();
        value.decode_from(bytes, point)?;
        *self = Some(value);
        Ok(())
    }

    fn encode_to(&self, point: &PointDescriptor) -> Result<Option<Vec<u8>>> {
        match self {
            Some(value) => value.encode_to(point),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::catalog::{DataType, RegisterKind};

    #[test]
    fn test_integer_field_truncates() {
        let desc = PointDescriptor::new(0).with_coefficient(0.1);
        let mut value = 0i32;
        value.decode_from(&[0x00, 0x17], &desc).unwrap();
        assert_eq!(value, 2);

        let mut float = 0.0f64;
        float.decode_from(&[0x00, 0x17], &desc).unwrap();
        assert_eq!(float, 2.3);
    }

    #[test]
    fn test_bool_field() {
        let desc = PointDescriptor::new(0).with_register_kind(RegisterKind::Coil);
        let mut on = false;
        on.decode_from(&[0x00, 0x01], &desc).unwrap();
        assert!(on);
        assert_eq!(false.encode_to(&desc).unwrap(), Some(vec![0x00, 0x00]));
        assert_eq!(<bool as PointType>::KIND, ValueKind::Bool);
    }

    #[test]
    fn test_option_allocates_on_decode_and_skips_none() {
        let desc = PointDescriptor::new(0);
        let mut value: Option<u16> = None;
        value.decode_from(&[0x01, 0x00], &desc).unwrap();
        assert_eq!(value, Some(256));

        let empty: Option<u16> = None;
        assert_eq!(empty.encode_to(&desc).unwrap(), None);
        assert!(<Option<u16> as PointType>::NULLABLE);
        assert_eq!(<Option<String> as PointType>::KIND, ValueKind::Text);
    }

    #[test]
    fn test_option_left_untouched_on_failure() {
        let desc = PointDescriptor::new(0).with_data_type(DataType::U32);
        let mut value: Option<u32> = None;
        assert!(value.decode_from(&[0x01], &desc).is_err());
        assert_eq!(value, None);
    }

    #[test]
    fn test_text_rejected_on_coils() {
        let desc = PointDescriptor::new(0).with_register_kind(RegisterKind::Coil);
        let mut text = String::new();
        let err = text.decode_from(&[0, 1], &desc).unwrap_err();
        assert!(matches!(err, PointMapError::UnsupportedShape { .. }));
        assert!(RawBytes::default().encode_to(&desc).is_err());
    }

    #[test]
    fn test_sequence_field() {
        let desc = PointDescriptor::new(0)
            .with_data_type(DataType::S16)
            .with_quantity(3);
        let mut values: Vec<i16> = vec![9, 9, 9, 9];
        values
            .decode_from(&[0xFF, 0xFF, 0x00, 0x02, 0x00, 0x03], &desc)
            .unwrap();
        assert_eq!(values, vec![-1, 2, 3]);
        assert_eq!(
            values.encode_to(&desc).unwrap(),
            Some(vec![0xFF, 0xFF, 0x00, 0x02, 0x00, 0x03])
        );
    }

    #[test]
    fn test_raw_bytes_field() {
        let desc = PointDescriptor::new(0).with_quantity(2);
        let mut raw = RawBytes::default();
        raw.decode_from(&[1, 2, 3, 4], &desc).unwrap();
        assert_eq!(raw.as_slice(), &[1, 2, 3, 4]);
        assert!(matches!(
            RawBytes::from(vec![1, 2, 3]).encode_to(&desc),
            Err(PointMapError::LengthMismatch { .. })
        ));
    }
}
