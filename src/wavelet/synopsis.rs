use serde::{Deserialize, Serialize};

use super::{level_of, merge_coefficients, normalization, tree_index, WaveletCoefficient};
use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::persist::{read_records, write_records, Record, SynopsisMeta};
use crate::storage::FileHandle;

/// A finished, key-sorted set of wavelet coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveletSynopsis {
    domain: Domain,
    threshold: usize,
    coefficients: Vec<WaveletCoefficient>,
}

/// Pending piece of a range query: offsets `[start, end]` inside the dyadic
/// range of tree node `index`, with the average reconstructed so far.
struct DyadicRange {
    start: u128,
    end: u128,
    value: f64,
    index: u128,
}

impl WaveletSynopsis {
    pub fn new(domain: Domain, threshold: usize, mut coefficients: Vec<WaveletCoefficient>) -> Self {
        coefficients.sort_unstable_by_key(|c| c.index());
        coefficients.dedup_by_key(|c| c.index());
        Self::from_sorted(domain, threshold, coefficients)
    }

    pub(crate) fn from_sorted(domain: Domain, threshold: usize, coefficients: Vec<WaveletCoefficient>) -> Self {
        Self {
            domain,
            threshold,
            coefficients,
        }
    }

    /// Reads a persisted synopsis.
    pub fn load(handle: &FileHandle, domain: Domain, threshold: usize) -> Result<Self> {
        let records = read_records(handle)?;
        if records.windows(2).any(|w| w[0].key >= w[1].key) {
            return Err(Error::InvalidData(format!(
                "coefficients of {} are not sorted by key",
                handle.name()
            )));
        }
        let coefficients = records
            .into_iter()
            .map(|r| WaveletCoefficient::new(r.value, level_of(r.key, domain.max_level()), r.key))
            .collect();
        Ok(Self::from_sorted(domain, threshold, coefficients))
    }

    pub fn persist(&self, handle: &FileHandle) -> Result<SynopsisMeta> {
        write_records(
            handle,
            self.coefficients
                .iter()
                .map(|c| Record::new(c.index(), c.value())),
        )
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }

    pub fn coefficients(&self) -> &[WaveletCoefficient] {
        &self.coefficients
    }

    /// Stored value under `index`; absent coefficients are zero.
    pub fn coefficient(&self, index: u64) -> f64 {
        self.coefficients
            .binary_search_by_key(&index, |c| c.index())
            .map(|slot| self.coefficients[slot].value())
            .unwrap_or(0.0)
    }

    /// Estimated weight at `position`.
    pub fn point_query(&self, position: i64) -> f64 {
        if self.is_empty() || !self.domain.contains(position) {
            return 0.0;
        }
        let max_level = self.domain.max_level();
        let offset = self.domain.offset(position);
        let mut value = self.coefficient(0);
        for level in (1..=max_level).rev() {
            let index = tree_index(offset, level, max_level);
            let detail = self.coefficient(index) * normalization(max_level, level as i32);
            if (offset >> (level - 1)) & 1 == 0 {
                value += detail;
            } else {
                value -= detail;
            }
        }
        value
    }

    /// Estimated total weight in `[start, end]`, clamped to the domain.
    pub fn range_query(&self, start: i64, end: i64) -> f64 {
        let start = start.max(self.domain.start());
        let end = end.min(self.domain.end());
        if self.is_empty() || start > end {
            return 0.0;
        }
        let max_level = self.domain.max_level();
        let mut ranges = vec![DyadicRange {
            start: self.domain.offset(start) as u128,
            end: self.domain.offset(end) as u128,
            value: self.coefficient(0),
            index: 1,
        }];
        let mut total = 0.0;

        for level in (0..=max_level).rev() {
            let mut next = Vec::with_capacity(ranges.len() * 2);
            for range in ranges {
                let node_start = (range.index - (1u128 << (max_level - level))) << level;
                let node_end = node_start + (1u128 << level) - 1;
                if range.start == node_start && range.end == node_end {
                    total += range.value * 2f64.powi(level as i32);
                    continue;
                }
                let detail =
                    self.coefficient(range.index as u64) * normalization(max_level, level as i32);
                let mid = node_start + (1u128 << (level - 1));
                if range.start < mid {
                    next.push(DyadicRange {
                        start: range.start,
                        end: range.end.min(mid - 1),
                        value: range.value + detail,
                        index: range.index << 1,
                    });
                }
                if range.end >= mid {
                    next.push(DyadicRange {
                        start: range.start.max(mid),
                        end: range.end,
                        value: range.value - detail,
                        index: (range.index << 1) | 1,
                    });
                }
            }
            if next.is_empty() {
                break;
            }
            ranges = next;
        }
        total
    }

    /// Combines two synopses over the same domain.
    pub fn merge(&self, other: &WaveletSynopsis) -> Result<WaveletSynopsis> {
        if self.domain != other.domain {
            return Err(Error::InvalidOperation(format!(
                "cannot merge wavelet synopses over {:?} and {:?}",
                self.domain, other.domain
            )));
        }
        let threshold = self.threshold.max(other.threshold);
        let coefficients = merge_coefficients(&self.coefficients, &other.coefficients, threshold);
        Ok(Self::from_sorted(self.domain, threshold, coefficients))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::keycode::IntegerOrdinal;
    use crate::storage::{MemoryStore, PagedStore, SynopsisFile};
    use crate::wavelet::SparseWaveletTransformBuilder;
    use std::sync::Arc;

    fn file(store: &Arc<dyn PagedStore>, name: &str) -> FileHandle {
        let mut file = SynopsisFile::new(store.clone(), name);
        file.create().unwrap();
        file.activate().unwrap();
        file.handle().unwrap()
    }

    fn build(handle: FileHandle, bits: u32, threshold: usize, positions: &[i64]) -> WaveletSynopsis {
        let domain = Domain::with_bits(bits).unwrap();
        let mut builder =
            SparseWaveletTransformBuilder::new(handle, domain, 0, threshold, Arc::new(IntegerOrdinal));
        for &p in positions {
            builder.add_position(p, 1.0).unwrap();
        }
        builder.end().unwrap()
    }

    fn store() -> Arc<dyn PagedStore> {
        Arc::new(MemoryStore::new(128))
    }

    #[test]
    fn test_range_matches_point_sums() {
        let store = store();
        let positions = [-128, -100, -100, -7, 0, 1, 1, 1, 63, 64, 126, 127];
        // small threshold: the identity must hold for the approximation too
        for threshold in [4, 16, 1024] {
            let synopsis = build(file(&store, &format!("w{}", threshold)), 8, threshold, &positions);
            for (start, end) in [(-128, 127), (-100, -100), (-101, 0), (1, 64), (60, 127), (-3, 5)] {
                let sum: f64 = (start..=end).map(|p| synopsis.point_query(p)).sum();
                assert!(
                    (synopsis.range_query(start, end) - sum).abs() < 1e-6,
                    "threshold {} range [{}, {}]",
                    threshold,
                    start,
                    end
                );
            }
        }
    }

    #[test]
    fn test_range_clamps_to_domain() {
        let store = store();
        let synopsis = build(file(&store, "w"), 4, 64, &[-8, 3, 7]);
        assert!((synopsis.range_query(-100, 100) - 3.0).abs() < 1e-9);
        assert!((synopsis.range_query(5, 100) - 1.0).abs() < 1e-9);
        assert_eq!(synopsis.range_query(5, 4), 0.0);
        assert_eq!(synopsis.range_query(8, 20), 0.0);
        assert_eq!(synopsis.point_query(8), 0.0);
    }

    #[test]
    fn test_persistence_round_trip() {
        let store = store();
        let synopsis = build(file(&store, "built"), 8, 100, &[-50, -2, -2, 9, 100]);

        let copy = file(&store, "copy");
        let meta = synopsis.persist(&copy).unwrap();
        assert_eq!(meta.num_elements as usize, synopsis.len());
        // 128 byte pages hold 8 records
        assert_eq!(meta.num_pages as usize, synopsis.len().div_ceil(8));
        assert_eq!(SynopsisMeta::read(&copy).unwrap(), meta);

        let loaded = WaveletSynopsis::load(&copy, *synopsis.domain(), 100).unwrap();
        assert_eq!(loaded, synopsis);
        for c in loaded.coefficients() {
            assert_eq!(c.level(), level_of(c.index(), 8));
        }
    }

    #[test]
    fn test_merge_matches_single_build() {
        let store = store();
        let positions = [-32, -30, -30, -11, -1, 0, 4, 4, 4, 17, 30, 31];
        let full = build(file(&store, "full"), 6, 200, &positions);

        for cut in [-31, -1, 0, 5, 31] {
            let (low, high): (Vec<i64>, Vec<i64>) = positions.iter().copied().partition(|&p| p < cut);
            let left = file(&store, &format!("left{}", cut));
            let right = file(&store, &format!("right{}", cut));
            build(left.clone(), 6, 200, &low);
            build(right.clone(), 6, 200, &high);

            let domain = Domain::with_bits(6).unwrap();
            let left = WaveletSynopsis::load(&left, domain, 200).unwrap();
            let right = WaveletSynopsis::load(&right, domain, 200).unwrap();
            let merged = left.merge(&right).unwrap();
            for p in -32..=31 {
                assert!(
                    (merged.point_query(p) - full.point_query(p)).abs() < 1e-9,
                    "cut {} position {}",
                    cut,
                    p
                );
            }
        }
    }

    #[test]
    fn test_merge_rejects_other_domain() {
        let a = WaveletSynopsis::new(Domain::with_bits(4).unwrap(), 8, Vec::new());
        let b = WaveletSynopsis::new(Domain::with_bits(5).unwrap(), 8, Vec::new());
        assert!(matches!(a.merge(&b), Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn test_new_sorts_coefficients() {
        let domain = Domain::with_bits(3).unwrap();
        let synopsis = WaveletSynopsis::new(
            domain,
            4,
            vec![
                WaveletCoefficient::new(0.5, 2, 3),
                WaveletCoefficient::new(1.0, 3, 0),
                WaveletCoefficient::new(-0.25, 3, 1),
            ],
        );
        let indices: Vec<u64> = synopsis.coefficients().iter().map(|c| c.index()).collect();
        assert_eq!(indices, vec![0, 1, 3]);
        assert_eq!(synopsis.coefficient(3), 0.5);
        assert_eq!(synopsis.coefficient(2), 0.0);
    }

    #[test]
    fn test_bincode_shipping() {
        let store = store();
        let synopsis = build(file(&store, "w"), 8, 32, &[1, 2, 3]);
        let bytes = crate::encoding::bincode::serialize(&synopsis).unwrap();
        let shipped: WaveletSynopsis = crate::encoding::bincode::deserialize(&bytes).unwrap();
        assert_eq!(shipped, synopsis);
    }
}
