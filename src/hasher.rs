use std::fmt;

use crc::{Crc, Digest, CRC_64_ECMA_182};

static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// Streaming CRC-64 over the records of a persisted synopsis.
///
/// Records are fed page by page while they are written, so the digest is
/// kept running instead of buffering the whole record stream.
#[derive(Clone)]
pub struct Hasher {
    digest: Digest<'static, u64>,
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hasher")
    }
}

impl Hasher {
    pub fn new() -> Self {
        Self {
            digest: CRC64.digest(),
        }
    }

    pub fn write(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    pub fn checksum(&self) -> u64 {
        self.digest.clone().finalize()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_checksum() {
        let mut split = Hasher::new();
        split.write(&[0u8, 0, 0, 0, 0, 0, 0, 1]);
        split.write(&2.5f64.to_be_bytes());

        let mut whole = Hasher::new();
        let mut record = Vec::new();
        record.extend_from_slice(&1u64.to_be_bytes());
        record.extend_from_slice(&2.5f64.to_be_bytes());
        whole.write(&record);

        assert_eq!(split.checksum(), whole.checksum());
    }

    #[test]
    fn test_checksum_is_not_consumed() {
        let mut hasher = Hasher::new();
        hasher.write(b"records");
        let first = hasher.checksum();
        assert_eq!(first, hasher.checksum());

        hasher.write(b"more");
        assert_ne!(first, hasher.checksum());
    }

    #[test]
    fn test_different_records_different_checksums() {
        let mut a = Hasher::new();
        a.write(&1.0f64.to_be_bytes());
        let mut b = Hasher::new();
        b.write(&(-1.0f64).to_be_bytes());
        assert_ne!(a.checksum(), b.checksum());
    }
}
