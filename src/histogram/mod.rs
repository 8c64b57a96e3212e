//! Equi-height histograms over the ordinal domain.
//!
//! Buckets are contiguous: each one spans from the border after its
//! predecessor (the domain start for the first) up to its own right border,
//! and the last one always ends at the domain end.
//!
//! ```text
//!   start                                                     end
//!   |------- b0 -------|---- b1 ----|----------- b2 -----------|
//!                    border0      border1                   border2
//! ```
//!
//! A continuous bucket spreads its count evenly over every position it
//! spans. A uniform bucket also remembers how many distinct positions it
//! saw and places that many equally spaced spikes, starting at its left
//! edge, each holding an equal share of the count.

mod builder;

pub use builder::HistogramBuilder;

use serde::{Deserialize, Serialize};

use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::persist::{read_records, write_records, Record, SynopsisMeta};
use crate::storage::FileHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistogramKind {
    Uniform,
    Continuous,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBucket {
    pub border: i64,
    pub count: f64,
    /// Distinct positions folded into the bucket.
    pub unique: u64,
}

impl HistogramBucket {
    pub fn new(border: i64, count: f64, unique: u64) -> Self {
        Self {
            border,
            count,
            unique,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSynopsis {
    kind: HistogramKind,
    domain: Domain,
    size: usize,
    buckets: Vec<HistogramBucket>,
}

impl HistogramSynopsis {
    pub fn new(kind: HistogramKind, domain: Domain, size: usize, buckets: Vec<HistogramBucket>) -> Self {
        Self {
            kind,
            domain,
            size,
            buckets,
        }
    }

    /// Reads a persisted histogram.
    ///
    /// Records are keyed by the border's offset from the domain start.
    /// Uniform histograms store two records per bucket, `(border, count)`
    /// followed by `(border, unique)`.
    pub fn load(handle: &FileHandle, kind: HistogramKind, domain: Domain, size: usize) -> Result<Self> {
        let records = read_records(handle)?;
        let border = |record: &Record| domain.start().wrapping_add(record.key as i64);
        let buckets: Vec<HistogramBucket> = match kind {
            HistogramKind::Continuous => records
                .iter()
                .map(|r| HistogramBucket::new(border(r), r.value, 0))
                .collect(),
            HistogramKind::Uniform => {
                if records.len() % 2 != 0 {
                    return Err(Error::InvalidData(format!(
                        "uniform histogram {} has an unpaired record",
                        handle.name()
                    )));
                }
                records
                    .chunks_exact(2)
                    .map(|pair| HistogramBucket::new(border(&pair[0]), pair[0].value, pair[1].value as u64))
                    .collect()
            }
        };
        if buckets.windows(2).any(|w| w[0].border >= w[1].border) {
            return Err(Error::InvalidData(format!(
                "bucket borders of {} are not increasing",
                handle.name()
            )));
        }
        Ok(Self::new(kind, domain, size, buckets))
    }

    pub fn persist(&self, handle: &FileHandle) -> Result<SynopsisMeta> {
        let domain = self.domain;
        let key = move |bucket: &HistogramBucket| domain.offset(bucket.border);
        let kind = self.kind;
        let records = self.buckets.iter().flat_map(move |bucket| {
            let count = Record::new(key(bucket), bucket.count);
            let unique = match kind {
                HistogramKind::Uniform => Some(Record::new(key(bucket), bucket.unique as f64)),
                HistogramKind::Continuous => None,
            };
            std::iter::once(count).chain(unique)
        });
        write_records(handle, records)
    }

    pub fn kind(&self) -> HistogramKind {
        self.kind
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn buckets(&self) -> &[HistogramBucket] {
        &self.buckets
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Buckets with their inclusive left edge.
    fn spans(&self) -> impl Iterator<Item = (i128, &HistogramBucket)> + '_ {
        let start = self.domain.start() as i128;
        self.buckets.iter().scan(start, |left, bucket| {
            let span = (*left, bucket);
            *left = bucket.border as i128 + 1;
            Some(span)
        })
    }

    pub fn point_query(&self, position: i64) -> f64 {
        self.range_query(position, position)
    }

    pub fn range_query(&self, start: i64, end: i64) -> f64 {
        let (start, end) = (start as i128, end as i128);
        if start > end {
            return 0.0;
        }
        let mut total = 0.0;
        for (left, bucket) in self.spans() {
            let right = bucket.border as i128;
            if right < start {
                continue;
            }
            if left > end {
                break;
            }
            let (lo, hi) = (left.max(start), right.min(end));
            total += match self.kind {
                HistogramKind::Continuous => {
                    bucket.count * (hi - lo + 1) as f64 / (right - left + 1) as f64
                }
                HistogramKind::Uniform => uniform_share(bucket, left, right, lo, hi),
            };
        }
        total
    }

    pub fn merge(&self, _other: &HistogramSynopsis) -> Result<HistogramSynopsis> {
        Err(Error::InvalidOperation(
            "histogram synopses cannot be merged".to_string(),
        ))
    }
}

/// Weight of the spikes of `bucket` (spanning `[left, right]`) that fall
/// in `[lo, hi]`.
fn uniform_share(bucket: &HistogramBucket, left: i128, right: i128, lo: i128, hi: i128) -> f64 {
    if bucket.unique == 0 {
        return 0.0;
    }
    let unique = bucket.unique as i128;
    let spacing = ((right - left + 1) / unique).max(1);
    // spike j sits at left + j * spacing
    let first = (lo - left + spacing - 1) / spacing;
    let last = ((hi - left) / spacing).min(unique - 1);
    if last < first {
        return 0.0;
    }
    (last - first + 1) as f64 * bucket.count / bucket.unique as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain() -> Domain {
        Domain::with_bits(8).unwrap()
    }

    fn buckets() -> Vec<HistogramBucket> {
        vec![
            HistogramBucket::new(-4, 2.0, 1),
            HistogramBucket::new(19, 4.0, 2),
            HistogramBucket::new(127, 2.0, 2),
        ]
    }

    #[test]
    fn test_continuous_queries() {
        let h = HistogramSynopsis::new(HistogramKind::Continuous, domain(), 4, buckets());
        assert!((h.point_query(-10) - 2.0 / 125.0).abs() < 1e-12);
        assert!((h.range_query(-128, 127) - 8.0).abs() < 1e-9);
        assert!((h.range_query(-3, 19) - 4.0).abs() < 1e-9);
        assert!((h.range_query(0, 19) - 4.0 * 20.0 / 23.0).abs() < 1e-9);
        assert_eq!(h.range_query(5, 4), 0.0);
    }

    #[test]
    fn test_uniform_queries() {
        let h = HistogramSynopsis::new(HistogramKind::Uniform, domain(), 4, buckets());
        // [-3, 19]: span 23, two spikes 11 apart
        assert_eq!(h.point_query(-3), 2.0);
        assert_eq!(h.point_query(8), 2.0);
        assert_eq!(h.point_query(5), 0.0);
        assert_eq!(h.range_query(0, 10), 2.0);
        assert_eq!(h.point_query(-128), 2.0);
        assert_eq!(h.point_query(-127), 0.0);
        // [20, 127]: spikes at 20 and 74
        assert_eq!(h.point_query(74), 1.0);
        assert_eq!(h.range_query(-128, 127), 8.0);
    }

    #[test]
    fn test_range_matches_point_sums() {
        for kind in [HistogramKind::Uniform, HistogramKind::Continuous] {
            let h = HistogramSynopsis::new(kind, domain(), 4, buckets());
            for (start, end) in [(-128, 127), (-20, 30), (8, 8), (100, 127)] {
                let sum: f64 = (start..=end).map(|p| h.point_query(p)).sum();
                assert!((h.range_query(start, end) - sum).abs() < 1e-9, "{:?}", kind);
            }
        }
    }

    #[test]
    fn test_full_width_domain() {
        let domain = Domain::with_bits(64).unwrap();
        let h = HistogramSynopsis::new(
            HistogramKind::Continuous,
            domain,
            2,
            vec![
                HistogramBucket::new(-1, 10.0, 3),
                HistogramBucket::new(i64::MAX, 6.0, 2),
            ],
        );
        assert!((h.range_query(i64::MIN, i64::MAX) - 16.0).abs() < 1e-9);
        assert!((h.range_query(0, i64::MAX) - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_merge_unsupported() {
        let h = HistogramSynopsis::new(HistogramKind::Continuous, domain(), 4, buckets());
        assert!(matches!(h.merge(&h), Err(Error::InvalidOperation(_))));
    }
}
