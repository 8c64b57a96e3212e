use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::bloom::BloomCalculations;
use crate::error::{Error, Result};

/// The closed set of synopsis kinds a collector can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SynopsisKind {
    Wavelet,
    UniformHistogram,
    ContinuousHistogram,
    Bloom,
}

impl std::fmt::Display for SynopsisKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SynopsisKind::Wavelet => "wavelet",
            SynopsisKind::UniformHistogram => "uniform-histogram",
            SynopsisKind::ContinuousHistogram => "continuous-histogram",
            SynopsisKind::Bloom => "bloom",
        };
        write!(f, "{}", name)
    }
}

/// Configuration for statistics collected on an LSM component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsConfig {
    /// Which synopsis to build (default: Wavelet)
    pub kind: SynopsisKind,

    /// Wavelet threshold or histogram bucket count (default: 10)
    pub size: usize,

    /// Indexes of the tuple fields forming the key (default: [0])
    pub key_fields: Vec<usize>,

    /// Count deletion markers as negative weight (default: false)
    pub antimatter_aware: bool,

    /// Bloom filter sizing
    pub bloom: BloomConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloomConfig {
    /// Bits reserved per expected element (default: 10)
    pub bits_per_element: u32,

    /// Hash probes per key. `None` derives the optimum from `bits_per_element`.
    pub num_hashes: Option<u32>,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            bits_per_element: 10,
            num_hashes: None,
        }
    }
}

impl BloomConfig {
    /// Set bits per element
    pub fn bits_per_element(mut self, bits: u32) -> Self {
        self.bits_per_element = bits;
        self
    }

    /// Pin the number of hash probes
    pub fn num_hashes(mut self, hashes: u32) -> Self {
        self.num_hashes = Some(hashes);
        self
    }

    /// Hash probes actually used: `bits_per_element * ln 2`, at least one.
    pub fn effective_hashes(&self) -> u32 {
        match self.num_hashes {
            Some(n) => n.max(1),
            None => BloomCalculations::compute(self.bits_per_element).num_hashes,
        }
    }
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            kind: SynopsisKind::Wavelet,
            size: 10,
            key_fields: vec![0],
            antimatter_aware: false,
            bloom: BloomConfig::default(),
        }
    }
}

impl StatisticsConfig {
    /// Create a new config for the given synopsis kind
    pub fn new(kind: SynopsisKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    /// Set threshold or bucket count
    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Set the key fields
    pub fn key_fields(mut self, fields: Vec<usize>) -> Self {
        self.key_fields = fields;
        self
    }

    /// Enable antimatter awareness
    pub fn antimatter_aware(mut self, enabled: bool) -> Self {
        self.antimatter_aware = enabled;
        self
    }

    /// Configure bloom filter sizing
    pub fn bloom(mut self, config: BloomConfig) -> Self {
        self.bloom = config;
        self
    }

    /// The single key field statistics are collected on.
    pub fn key_field(&self) -> Result<usize> {
        match self.key_fields.as_slice() {
            [field] => Ok(*field),
            fields => Err(Error::CompositeKeyUnsupported(fields.len())),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.kind != SynopsisKind::Bloom {
            self.key_field()?;
        } else if self.key_fields.is_empty() {
            return Err(Error::InvalidOperation(
                "bloom filter needs at least one key field".to_string(),
            ));
        }
        if self.size == 0 && self.kind != SynopsisKind::Bloom {
            return Err(Error::InvalidOperation(
                "synopsis size must be positive".to_string(),
            ));
        }
        if self.kind == SynopsisKind::Bloom && self.bloom.bits_per_element == 0 {
            return Err(Error::InvalidOperation(
                "bits per element must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the file-backed paged store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding one file per synopsis
    pub dir: PathBuf,

    /// Page size in bytes (default: 4KB)
    pub page_size: usize,

    /// Number of pages kept by the page cache (default: 256)
    pub cache_pages: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./ashdb-stats"),
            page_size: 4096,
            cache_pages: 256,
        }
    }
}

impl StoreConfig {
    /// Create a new config with the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set page size
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Set page cache capacity
    pub fn cache_pages(mut self, pages: usize) -> Self {
        self.cache_pages = pages;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StatisticsConfig::default();
        assert_eq!(config.kind, SynopsisKind::Wavelet);
        assert_eq!(config.size, 10);
        assert_eq!(config.key_fields, vec![0]);
        assert!(!config.antimatter_aware);
        assert_eq!(config.bloom.bits_per_element, 10);
        assert_eq!(config.bloom.effective_hashes(), 7);

        let store = StoreConfig::default();
        assert_eq!(store.page_size, 4096);
        assert_eq!(store.cache_pages, 256);
    }

    #[test]
    fn test_config_builder() {
        let config = StatisticsConfig::new(SynopsisKind::UniformHistogram)
            .size(32)
            .key_fields(vec![2])
            .antimatter_aware(true)
            .bloom(BloomConfig::default().bits_per_element(4).num_hashes(0));

        assert_eq!(config.kind, SynopsisKind::UniformHistogram);
        assert_eq!(config.size, 32);
        assert_eq!(config.key_field().unwrap(), 2);
        assert!(config.antimatter_aware);
        // zero probes would make every lookup a hit
        assert_eq!(config.bloom.effective_hashes(), 1);

        let store = StoreConfig::new("/tmp/stats").page_size(512).cache_pages(8);
        assert_eq!(store.dir, PathBuf::from("/tmp/stats"));
        assert_eq!(store.page_size, 512);
        assert_eq!(store.cache_pages, 8);
    }

    #[test]
    fn test_validate() {
        assert!(StatisticsConfig::default().validate().is_ok());

        let composite = StatisticsConfig::default().key_fields(vec![0, 1]);
        assert!(matches!(
            composite.validate(),
            Err(Error::CompositeKeyUnsupported(2))
        ));

        let empty = StatisticsConfig::default().size(0);
        assert!(matches!(empty.validate(), Err(Error::InvalidOperation(_))));

        // bloom filters hash every key field
        let bloom = StatisticsConfig::new(SynopsisKind::Bloom).key_fields(vec![0, 1]);
        assert!(bloom.validate().is_ok());
    }
}
