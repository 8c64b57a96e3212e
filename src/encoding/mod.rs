pub mod bincode;
pub mod keycode;

use crate::error::Result;

/// Order-preserving key field codec.
///
/// Encoded fields compare bytewise like the original values, so a key
/// field can be mapped back to an ordinal position in its domain.
pub trait Key {
    fn encode(&self) -> Vec<u8>;

    fn decode(bytes: &[u8]) -> Result<Self>
    where
        Self: Sized;
}

#[derive(Debug)]
pub enum EncodingError {
    InvalidFormat(String),
    TruncatedData,
}

impl std::fmt::Display for EncodingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodingError::InvalidFormat(msg) => write!(f, "malformed encoding: {}", msg),
            EncodingError::TruncatedData => write!(f, "truncated encoding"),
        }
    }
}

impl std::error::Error for EncodingError {}

impl From<EncodingError> for crate::Error {
    fn from(err: EncodingError) -> Self {
        crate::Error::InvalidData(err.to_string())
    }
}
