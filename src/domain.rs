//! Integer domain a synopsis is built over, derived from the key encoding.

use serde::{Deserialize, Serialize};

use crate::encoding::keycode::{TypeTraits, MAX_INTEGER_WIDTH};
use crate::error::{Error, Result};

/// `[start, end]` with `end - start + 1 == 2^max_level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    start: i64,
    end: i64,
    max_level: u32,
}

impl Domain {
    /// Domain of a signed ordinal `bits` wide (1..=64).
    pub fn with_bits(bits: u32) -> Result<Self> {
        if !(1..=64).contains(&bits) {
            return Err(Error::UnsupportedDomain(format!(
                "{} bit ordinals are not supported",
                bits
            )));
        }
        let end = if bits == 64 {
            i64::MAX
        } else {
            (1i64 << (bits - 1)) - 1
        };
        Ok(Self {
            start: !end,
            end,
            max_level: bits,
        })
    }

    pub fn from_type_traits(traits: &TypeTraits) -> Result<Self> {
        Self::with_bits(max_level(traits)?)
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    pub fn contains(&self, position: i64) -> bool {
        (self.start..=self.end).contains(&position)
    }

    /// Distance of `position` from the domain start, as an unsigned offset.
    pub fn offset(&self, position: i64) -> u64 {
        position.wrapping_sub(self.start) as u64
    }
}

fn fixed_width(traits: &TypeTraits) -> Result<usize> {
    match traits.fixed_length {
        None => Err(Error::UnsupportedDomain(
            "variable-length keys have no ordinal domain".to_string(),
        )),
        Some(len) if len > MAX_INTEGER_WIDTH => Err(Error::UnsupportedDomain(format!(
            "{} byte keys exceed the 64-bit ordinal domain",
            len
        ))),
        // one byte is the type tag
        Some(len) if len < 2 => Err(Error::UnsupportedDomain(format!(
            "{} byte keys leave no room for an ordinal",
            len
        ))),
        Some(len) => Ok(len),
    }
}

pub fn max_level(traits: &TypeTraits) -> Result<u32> {
    Ok(((fixed_width(traits)? - 1) * 8) as u32)
}

pub fn max_domain_value(traits: &TypeTraits) -> Result<i64> {
    Ok(Domain::from_type_traits(traits)?.end)
}

pub fn min_domain_value(traits: &TypeTraits) -> Result<i64> {
    Ok(Domain::from_type_traits(traits)?.start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_domains() {
        assert_eq!(max_level(&TypeTraits::INT8).unwrap(), 8);
        assert_eq!(min_domain_value(&TypeTraits::INT8).unwrap(), -128);
        assert_eq!(max_domain_value(&TypeTraits::INT8).unwrap(), 127);

        assert_eq!(max_domain_value(&TypeTraits::INT32).unwrap(), i32::MAX as i64);
        assert_eq!(min_domain_value(&TypeTraits::INT32).unwrap(), i32::MIN as i64);

        let domain = Domain::from_type_traits(&TypeTraits::INT64).unwrap();
        assert_eq!(domain.max_level(), 64);
        assert_eq!(domain.start(), i64::MIN);
        assert_eq!(domain.end(), i64::MAX);
        assert_eq!(domain.offset(i64::MAX), u64::MAX);
    }

    #[test]
    fn test_unsupported_domains() {
        for traits in [TypeTraits::VARIABLE, TypeTraits::fixed(10), TypeTraits::fixed(1)] {
            assert!(matches!(
                Domain::from_type_traits(&traits),
                Err(Error::UnsupportedDomain(_))
            ));
        }
    }

    #[test]
    fn test_small_domain() {
        let domain = Domain::with_bits(3).unwrap();
        assert_eq!((domain.start(), domain.end()), (-4, 3));
        assert!(domain.contains(-4));
        assert!(!domain.contains(4));
        assert_eq!(domain.offset(-4), 0);
        assert_eq!(domain.offset(3), 7);
    }
}
