//! Bincode framing used to ship synopses and their configuration between
//! the component that builds them and the optimizer that consumes them.

use super::EncodingError;
use crate::error::Result;
use serde::{de::DeserializeOwned, Serialize};

pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value)
        .map_err(|e| EncodingError::InvalidFormat(format!("Serialization failed: {}", e)).into())
}

pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(map_decode_error)
}

fn map_decode_error(e: bincode::Error) -> crate::Error {
    match *e {
        bincode::ErrorKind::Io(ref io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            EncodingError::TruncatedData.into()
        }
        _ => EncodingError::InvalidFormat(format!("Deserialization failed: {}", e)).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StatisticsConfig, SynopsisKind};

    #[test]
    fn test_config_ships_intact() {
        let config = StatisticsConfig::new(SynopsisKind::ContinuousHistogram)
            .size(7)
            .antimatter_aware(true);

        let bytes = serialize(&config).unwrap();
        let shipped: StatisticsConfig = deserialize(&bytes).unwrap();
        assert_eq!(shipped, config);
    }

    #[test]
    fn test_truncated_input() {
        let bytes = serialize(&12345u64).unwrap();
        let result: Result<u64> = deserialize(&bytes[..3]);
        assert!(result.is_err());
    }
}
