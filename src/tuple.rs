//! Tuples as the access methods hand them to synopsis builders.

use crate::encoding::Key;

/// A row of encoded fields.
pub trait Tuple {
    fn field_count(&self) -> usize;

    /// Encoded bytes of field `index`; empty when out of range.
    fn field(&self, index: usize) -> &[u8];

    /// Deletion marker, for tuple types that carry one. `None` means the
    /// tuple representation has no notion of antimatter.
    fn antimatter(&self) -> Option<bool> {
        None
    }
}

/// Owned tuple of encoded fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyTuple {
    fields: Vec<Vec<u8>>,
    antimatter: Option<bool>,
}

impl KeyTuple {
    pub fn new(fields: Vec<Vec<u8>>) -> Self {
        Self {
            fields,
            antimatter: None,
        }
    }

    /// Single-field tuple holding `key`.
    pub fn from_key<K: Key>(key: K) -> Self {
        Self::new(vec![key.encode()])
    }

    /// Tags the tuple as an LSM entry with a deletion marker.
    pub fn with_antimatter(mut self, antimatter: bool) -> Self {
        self.antimatter = Some(antimatter);
        self
    }
}

impl Tuple for KeyTuple {
    fn field_count(&self) -> usize {
        self.fields.len()
    }

    fn field(&self, index: usize) -> &[u8] {
        self.fields.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    fn antimatter(&self) -> Option<bool> {
        self.antimatter
    }
}
