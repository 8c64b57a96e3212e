//! Order-preserving encoding of fixed-width signed integer keys.
//!
//! A key of width `w` is one type tag byte followed by `w - 1` big-endian
//! bytes of the value with its sign bit flipped, so negative values sort
//! before positive ones bytewise:
//!
//! ```text
//!   +------+---------------------------+
//!   | 0x02 | (v ^ 1 << (bits-1)) BE    |   bits = (w - 1) * 8
//!   +------+---------------------------+
//! ```
//!
//! The width is what [`TypeTraits`] reports for a key field, and it fixes
//! the ordinal domain a synopsis is built over.

use super::{EncodingError, Key};
use crate::error::Result;

const TYPE_INTEGER: u8 = 0x02;

/// Widest supported encoding: tag plus a 64-bit ordinal.
pub const MAX_INTEGER_WIDTH: usize = 9;

/// Width information of a key field, as the access method describes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeTraits {
    pub fixed_length: Option<usize>,
}

impl TypeTraits {
    pub const INT8: TypeTraits = TypeTraits::fixed(2);
    pub const INT16: TypeTraits = TypeTraits::fixed(3);
    pub const INT32: TypeTraits = TypeTraits::fixed(5);
    pub const INT64: TypeTraits = TypeTraits::fixed(9);
    pub const VARIABLE: TypeTraits = TypeTraits { fixed_length: None };

    pub const fn fixed(length: usize) -> Self {
        TypeTraits {
            fixed_length: Some(length),
        }
    }

    pub fn is_fixed_length(&self) -> bool {
        self.fixed_length.is_some()
    }
}

/// Turns an encoded key field into its ordinal position.
pub trait OrdinalValueProvider: Send + Sync {
    fn ordinal_value(&self, field: &[u8]) -> Result<i64>;
}

/// Ordinal provider for keys written by [`encode_integer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerOrdinal;

impl OrdinalValueProvider for IntegerOrdinal {
    fn ordinal_value(&self, field: &[u8]) -> Result<i64> {
        decode_integer(field)
    }
}

fn bits_of(width: usize) -> Result<u32> {
    if !(2..=MAX_INTEGER_WIDTH).contains(&width) {
        return Err(EncodingError::InvalidFormat(format!(
            "Integer width must be 2..=9 bytes, got {}",
            width
        ))
        .into());
    }
    Ok(((width - 1) * 8) as u32)
}

fn encode_unchecked(value: i64, width: usize) -> Vec<u8> {
    let bits = ((width - 1) * 8) as u32;
    let unsigned = (value as u64) ^ (1u64 << (bits - 1));
    let mut result = Vec::with_capacity(width);
    result.push(TYPE_INTEGER);
    result.extend_from_slice(&unsigned.to_be_bytes()[8 - (width - 1)..]);
    result
}

/// Encode `value` into a key of `width` bytes.
pub fn encode_integer(value: i64, width: usize) -> Result<Vec<u8>> {
    let bits = bits_of(width)?;
    if bits < 64 {
        let max = (1i64 << (bits - 1)) - 1;
        if value > max || value < !max {
            return Err(EncodingError::InvalidFormat(format!(
                "{} does not fit in {} bytes",
                value, width
            ))
            .into());
        }
    }
    Ok(encode_unchecked(value, width))
}

/// Decode an integer key; the width is taken from the slice length.
pub fn decode_integer(bytes: &[u8]) -> Result<i64> {
    if bytes.is_empty() {
        return Err(EncodingError::TruncatedData.into());
    }
    if bytes[0] != TYPE_INTEGER {
        return Err(EncodingError::InvalidFormat("Not an integer type".to_string()).into());
    }
    let bits = bits_of(bytes.len())?;

    let mut buf = [0u8; 8];
    buf[8 - (bytes.len() - 1)..].copy_from_slice(&bytes[1..]);
    let flipped = u64::from_be_bytes(buf) ^ (1u64 << (bits - 1));

    // sign-extend from `bits`
    let shift = 64 - bits;
    Ok(((flipped << shift) as i64) >> shift)
}

macro_rules! impl_integer_key {
    ($($ty:ty => $width:expr),*) => {
        $(
            impl Key for $ty {
                fn encode(&self) -> Vec<u8> {
                    encode_unchecked(*self as i64, $width)
                }

                fn decode(bytes: &[u8]) -> Result<Self> {
                    let value = decode_integer(bytes)?;
                    <$ty>::try_from(value).map_err(|_| {
                        EncodingError::InvalidFormat(format!(
                            "{} out of range for {}",
                            value,
                            stringify!($ty)
                        ))
                        .into()
                    })
                }
            }
        )*
    };
}

impl_integer_key!(i8 => 2, i16 => 3, i32 => 5, i64 => 9);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_roundtrip_all_widths() {
        for (value, width) in [(-128i64, 2), (127, 2), (-1, 3), (40_000, 5), (i64::MIN, 9), (i64::MAX, 9)] {
            let encoded = encode_integer(value, width).unwrap();
            assert_eq!(encoded.len(), width);
            assert_eq!(decode_integer(&encoded).unwrap(), value);
        }
    }

    #[test]
    fn test_integer_ordering() {
        let values = [-128i64, -5, -1, 0, 1, 64, 127];
        let encoded: Vec<_> = values.iter().map(|v| encode_integer(*v, 2).unwrap()).collect();
        for pair in encoded.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_integer_out_of_range() {
        assert!(encode_integer(128, 2).is_err());
        assert!(encode_integer(-129, 2).is_err());
        assert!(encode_integer(0, 1).is_err());
        assert!(encode_integer(0, 10).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(decode_integer(&[]).is_err());
        assert!(decode_integer(&[0x03, 0x80]).is_err());
        assert!(decode_integer(&[0x02]).is_err());
    }

    #[test]
    fn test_key_trait_widths() {
        assert_eq!(Key::encode(&5i8).len(), 2);
        assert_eq!(Key::encode(&5i16).len(), 3);
        assert_eq!(Key::encode(&5i32).len(), 5);
        assert_eq!(Key::encode(&5i64).len(), 9);
        assert_eq!(<i32 as Key>::decode(&Key::encode(&-7i32)).unwrap(), -7);
        assert!(<i8 as Key>::decode(&Key::encode(&300i16)).is_err());
    }

    #[test]
    fn test_ordinal_provider() {
        let field = encode_integer(-42, 5).unwrap();
        assert_eq!(IntegerOrdinal.ordinal_value(&field).unwrap(), -42);
        assert_eq!(TypeTraits::INT32.fixed_length, Some(5));
        assert!(!TypeTraits::VARIABLE.is_fixed_length());
    }
}
