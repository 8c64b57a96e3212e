pub mod bloom;
pub mod cache;
pub mod config;
pub mod domain;
pub mod encoding;
pub mod error;
pub mod estimator;
pub mod hasher;
pub mod histogram;
pub mod persist;
pub mod storage;
pub mod synopsis;
pub mod tuple;
pub mod wavelet;

pub use bloom::{BloomCalculations, BloomFilter, BloomFilterBuilder};
pub use config::{BloomConfig, StatisticsConfig, StoreConfig, SynopsisKind};
pub use domain::Domain;
pub use error::{Error, Result};
pub use estimator::ComponentStatistics;
pub use hasher::Hasher;
pub use storage::{FileStore, MemoryStore, PagedStore, SynopsisFile};
pub use synopsis::{create_builder, load, Synopsis, SynopsisBuilder};
pub use tuple::{KeyTuple, Tuple};
