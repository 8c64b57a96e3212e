//! Synopsis kinds behind one closed interface, and the factory building them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{StatisticsConfig, SynopsisKind};
use crate::domain::Domain;
use crate::encoding::keycode::{IntegerOrdinal, OrdinalValueProvider, TypeTraits};
use crate::error::{Error, Result};
use crate::histogram::{HistogramBuilder, HistogramKind, HistogramSynopsis};
use crate::persist::SynopsisMeta;
use crate::storage::{FileHandle, SynopsisFile};
use crate::tuple::Tuple;
use crate::wavelet::{SparseWaveletTransformBuilder, WaveletSynopsis};

/// A finished, queryable synopsis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Synopsis {
    Wavelet(WaveletSynopsis),
    UniformHistogram(HistogramSynopsis),
    ContinuousHistogram(HistogramSynopsis),
}

impl Synopsis {
    pub fn kind(&self) -> SynopsisKind {
        match self {
            Synopsis::Wavelet(_) => SynopsisKind::Wavelet,
            Synopsis::UniformHistogram(_) => SynopsisKind::UniformHistogram,
            Synopsis::ContinuousHistogram(_) => SynopsisKind::ContinuousHistogram,
        }
    }

    pub fn domain(&self) -> &Domain {
        match self {
            Synopsis::Wavelet(w) => w.domain(),
            Synopsis::UniformHistogram(h) | Synopsis::ContinuousHistogram(h) => h.domain(),
        }
    }

    /// Stored elements: coefficients or buckets.
    pub fn len(&self) -> usize {
        match self {
            Synopsis::Wavelet(w) => w.len(),
            Synopsis::UniformHistogram(h) | Synopsis::ContinuousHistogram(h) => h.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn point_query(&self, position: i64) -> f64 {
        match self {
            Synopsis::Wavelet(w) => w.point_query(position),
            Synopsis::UniformHistogram(h) | Synopsis::ContinuousHistogram(h) => h.point_query(position),
        }
    }

    pub fn range_query(&self, start: i64, end: i64) -> f64 {
        match self {
            Synopsis::Wavelet(w) => w.range_query(start, end),
            Synopsis::UniformHistogram(h) | Synopsis::ContinuousHistogram(h) => h.range_query(start, end),
        }
    }

    pub fn merge(&self, other: &Synopsis) -> Result<Synopsis> {
        match (self, other) {
            (Synopsis::Wavelet(a), Synopsis::Wavelet(b)) => Ok(Synopsis::Wavelet(a.merge(b)?)),
            (Synopsis::UniformHistogram(a), Synopsis::UniformHistogram(b))
            | (Synopsis::ContinuousHistogram(a), Synopsis::ContinuousHistogram(b)) => {
                a.merge(b).map(|h| self.rewrap(h))
            }
            _ => Err(Error::InvalidOperation(format!(
                "cannot merge a {} synopsis with a {} synopsis",
                self.kind(),
                other.kind()
            ))),
        }
    }

    fn rewrap(&self, histogram: HistogramSynopsis) -> Synopsis {
        match self {
            Synopsis::UniformHistogram(_) => Synopsis::UniformHistogram(histogram),
            _ => Synopsis::ContinuousHistogram(histogram),
        }
    }

    pub fn persist(&self, handle: &FileHandle) -> Result<SynopsisMeta> {
        match self {
            Synopsis::Wavelet(w) => w.persist(handle),
            Synopsis::UniformHistogram(h) | Synopsis::ContinuousHistogram(h) => h.persist(handle),
        }
    }

    /// Encodes the synopsis for shipping to another node.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        crate::encoding::bincode::serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        crate::encoding::bincode::deserialize(bytes)
    }
}

/// A synopsis under construction.
pub enum SynopsisBuilder {
    Wavelet(SparseWaveletTransformBuilder),
    Histogram(HistogramBuilder),
}

impl SynopsisBuilder {
    pub fn add<T: Tuple + ?Sized>(&mut self, tuple: &T) -> Result<()> {
        match self {
            SynopsisBuilder::Wavelet(b) => b.add(tuple),
            SynopsisBuilder::Histogram(b) => b.add(tuple),
        }
    }

    pub fn set_antimatter(&mut self, aware: bool) {
        match self {
            SynopsisBuilder::Wavelet(b) => b.set_antimatter(aware),
            SynopsisBuilder::Histogram(b) => b.set_antimatter(aware),
        }
    }

    pub fn end(self) -> Result<Synopsis> {
        match self {
            SynopsisBuilder::Wavelet(b) => b.end().map(Synopsis::Wavelet),
            SynopsisBuilder::Histogram(b) => b.end().map(|h| match h.kind() {
                HistogramKind::Uniform => Synopsis::UniformHistogram(h),
                HistogramKind::Continuous => Synopsis::ContinuousHistogram(h),
            }),
        }
    }

    pub fn abort(self) {
        match self {
            SynopsisBuilder::Wavelet(b) => b.abort(),
            SynopsisBuilder::Histogram(b) => b.abort(),
        }
    }
}

fn histogram_kind(kind: SynopsisKind) -> Result<Option<HistogramKind>> {
    match kind {
        SynopsisKind::Wavelet => Ok(None),
        SynopsisKind::UniformHistogram => Ok(Some(HistogramKind::Uniform)),
        SynopsisKind::ContinuousHistogram => Ok(Some(HistogramKind::Continuous)),
        SynopsisKind::Bloom => Err(Error::InvalidOperation(
            "bloom filters are built through BloomFilter::create_builder".to_string(),
        )),
    }
}

/// Creates the builder `config` asks for, writing into the activated `file`.
///
/// `num_elements` is the expected tuple count; histograms size their
/// buckets from it. Configuration and domain errors are raised before any
/// page is touched.
pub fn create_builder(
    config: &StatisticsConfig,
    type_traits: &TypeTraits,
    file: &SynopsisFile,
    num_elements: u64,
) -> Result<SynopsisBuilder> {
    config.validate()?;
    let histogram = histogram_kind(config.kind)?;
    let key_field = config.key_field()?;
    let domain = Domain::from_type_traits(type_traits)?;
    let handle = file.handle()?;
    let ordinal: Arc<dyn OrdinalValueProvider> = Arc::new(IntegerOrdinal);

    tracing::debug!(
        file = file.name(),
        kind = %config.kind,
        size = config.size,
        max_level = domain.max_level(),
        "Creating synopsis builder"
    );
    let mut builder = match histogram {
        None => SynopsisBuilder::Wavelet(SparseWaveletTransformBuilder::new(
            handle,
            domain,
            key_field,
            config.size,
            ordinal,
        )),
        Some(kind) => SynopsisBuilder::Histogram(HistogramBuilder::new(
            handle,
            kind,
            domain,
            key_field,
            config.size,
            num_elements,
            ordinal,
        )),
    };
    builder.set_antimatter(config.antimatter_aware);
    Ok(builder)
}

/// Reads back a synopsis persisted in the activated `file`.
pub fn load(config: &StatisticsConfig, type_traits: &TypeTraits, file: &SynopsisFile) -> Result<Synopsis> {
    let histogram = histogram_kind(config.kind)?;
    let domain = Domain::from_type_traits(type_traits)?;
    let handle = file.handle()?;
    let synopsis = match histogram {
        None => Synopsis::Wavelet(WaveletSynopsis::load(&handle, domain, config.size)?),
        Some(HistogramKind::Uniform) => Synopsis::UniformHistogram(HistogramSynopsis::load(
            &handle,
            HistogramKind::Uniform,
            domain,
            config.size,
        )?),
        Some(HistogramKind::Continuous) => Synopsis::ContinuousHistogram(HistogramSynopsis::load(
            &handle,
            HistogramKind::Continuous,
            domain,
            config.size,
        )?),
    };
    tracing::debug!(file = file.name(), kind = %config.kind, elements = synopsis.len(), "Loaded synopsis");
    Ok(synopsis)
}
