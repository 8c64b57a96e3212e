//! Sparse Haar wavelet synopses over an integer key domain.
//!
//! Coefficients live in an implicit complete binary tree over the domain:
//!
//! ```text
//!   index 0            global average                 (level L)
//!   index 1            detail of the whole domain     (level L)
//!   index 2, 3         details of its halves          (level L-1)
//!   ...
//!   2^(L-l) .. 2^(L-l+1)-1   details of level-l ranges
//! ```
//!
//! A level-`l` coefficient with index `k` summarises the dyadic range of
//! offsets `[(k - 2^(L-l)) << l, ((k - 2^(L-l) + 1) << l) - 1]` from the
//! domain start. Indices are unsigned: with a 64-bit domain the level-1
//! indices use the full `u64` range. Level-0 entries only exist while
//! building, and their index is the position itself.
//!
//! Stored values are details scaled by [`normalization`], which makes them
//! proportional to their orthonormal Haar magnitude, so keeping the largest
//! ones keeps the best approximation in the L2 sense.

mod builder;
mod merge;
mod pool;
mod synopsis;
mod topk;

pub use builder::SparseWaveletTransformBuilder;
pub use merge::merge_coefficients;
pub use pool::CoefficientPool;
pub use synopsis::WaveletSynopsis;
pub use topk::TopKCoefficientSet;

use serde::{Deserialize, Serialize};

use crate::domain::Domain;

/// Index carried by fresh and sentinel coefficients (the bits of `-1`).
pub const SENTINEL_INDEX: u64 = u64::MAX;

/// Tolerance for coefficient value equality.
pub const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveletCoefficient {
    value: f64,
    level: i32,
    index: u64,
}

impl WaveletCoefficient {
    pub fn new(value: f64, level: i32, index: u64) -> Self {
        Self {
            value,
            level,
            index,
        }
    }

    /// Stack guard meaning no position has been folded in yet.
    pub fn sentinel() -> Self {
        Self::new(0.0, -1, SENTINEL_INDEX)
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn is_sentinel(&self) -> bool {
        self.level < 0
    }

    pub(crate) fn reset(&mut self, level: i32) {
        self.value = 0.0;
        self.level = level;
        self.index = SENTINEL_INDEX;
    }

    /// Index of the level-`level + 1` coefficient whose range contains this one.
    pub fn parent_index(&self, domain: &Domain) -> u64 {
        if self.level == 0 {
            level_one_index(domain, self.index as i64)
        } else {
            self.index >> 1
        }
    }

    /// Whether `position` falls in the range this coefficient describes.
    pub fn covers(&self, position: i64, domain: &Domain) -> bool {
        match self.level {
            l if l < 0 => true,
            0 => self.index == position as u64,
            l => {
                let shifted = level_one_index(domain, position)
                    .checked_shr((l - 1) as u32)
                    .unwrap_or(0);
                shifted == self.index
            }
        }
    }

    /// First position after the range this coefficient describes.
    ///
    /// In a 64-bit domain a range ending at the domain end wraps around to
    /// the domain start.
    pub fn transform_position(&self, domain: &Domain) -> i64 {
        match self.level {
            l if l < 0 => domain.start(),
            0 => (self.index as i64).wrapping_add(1),
            l => {
                let half = 1u64 << (domain.max_level() - 1);
                let offset = (self.index.wrapping_add(1) << (l - 1)).wrapping_sub(half) << 1;
                domain.start().wrapping_add(offset as i64)
            }
        }
    }
}

impl PartialEq for WaveletCoefficient {
    fn eq(&self, other: &Self) -> bool {
        self.level == other.level
            && self.index == other.index
            && (self.value - other.value).abs() < EPSILON
    }
}

/// Level-1 tree index of the pair holding `position`.
fn level_one_index(domain: &Domain, position: i64) -> u64 {
    (domain.offset(position) >> 1) + (1u64 << (domain.max_level() - 1))
}

/// Tree index of the level-`level` coefficient covering `offset`, for
/// `1 <= level <= max_level`.
pub(crate) fn tree_index(offset: u64, level: u32, max_level: u32) -> u64 {
    offset.checked_shr(level).unwrap_or(0) + (1u64 << (max_level - level))
}

/// Scaling applied to a level-`level` detail: `2^((L - l) / 2)`, times
/// `sqrt(2)` when `L - l` is odd.
pub fn normalization(max_level: u32, level: i32) -> f64 {
    let depth = max_level as i32 - level;
    let base = 2f64.powi(depth / 2);
    if depth % 2 == 0 {
        base
    } else {
        base * std::f64::consts::SQRT_2
    }
}

/// Level of the coefficient stored under `index`. Index 0 is the global
/// average and sits at the top level with index 1.
pub fn level_of(index: u64, max_level: u32) -> i32 {
    if index == 0 {
        return max_level as i32;
    }
    max_level as i32 - index.ilog2() as i32
}
